use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Slot ids are handed out once, starting at 1, and never reused.
pub type SlotId = u32;

/// Internal vehicle id, assigned on the first sighting of a plate.
pub type VehicleId = u64;

pub type SessionId = Ulid;

/// Who is parked in a slot and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub vehicle_id: VehicleId,
    pub plate: String,
    pub since: Ms,
}

/// One parking space.
///
/// `occupied` flips as soon as a claim succeeds; `occupant` is filled in when
/// the claim is committed. A slot that is occupied with no occupant is a claim
/// whose unit of work is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub occupied: bool,
    pub occupant: Option<Occupant>,
}

impl Slot {
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            occupied: false,
            occupant: None,
        }
    }
}

/// One stay of a vehicle in a slot. Closed exactly once, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub vehicle_id: VehicleId,
    pub slot_id: SlotId,
    pub check_in: Ms,
    pub check_out: Option<Ms>,
    pub billed_hours: Option<u64>,
    pub amount: Option<u64>,
}

impl Session {
    pub fn open(id: SessionId, vehicle_id: VehicleId, slot_id: SlotId, check_in: Ms) -> Self {
        Self {
            id,
            vehicle_id,
            slot_id,
            check_in,
            check_out: None,
            billed_hours: None,
            amount: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }
}

/// A vehicle waiting for a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub vehicle_id: VehicleId,
    pub plate: String,
    pub requested_at: Ms,
}

/// Where a vehicle is in its lifeline: `NoSession → Queued → Occupying → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NoSession,
    Queued,
    Occupying,
    Closed,
}

/// WAL record format. One flat enum, no nesting.
///
/// Every engine operation appends exactly one event, so a unit of work is
/// either entirely on disk or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotsAdded {
        first_id: SlotId,
        count: u32,
    },
    VehicleQueued {
        vehicle_id: VehicleId,
        plate: String,
        requested_at: Ms,
    },
    /// Arrival that found a free slot.
    Parked {
        session_id: SessionId,
        vehicle_id: VehicleId,
        plate: String,
        slot_id: SlotId,
        check_in: Ms,
    },
    /// Queued vehicle moved into a slot by a drain.
    Seated {
        session_id: SessionId,
        vehicle_id: VehicleId,
        plate: String,
        slot_id: SlotId,
        check_in: Ms,
    },
    /// Session closed and slot released, together.
    Departed {
        session_id: SessionId,
        vehicle_id: VehicleId,
        slot_id: SlotId,
        check_out: Ms,
        billed_hours: u64,
        amount: u64,
    },
    /// A closed session written back by compaction.
    SessionArchived {
        session: Session,
        plate: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Arrival {
    #[serde(rename_all = "camelCase")]
    Parked {
        plate: String,
        slot_id: SlotId,
        free_slots_remaining: usize,
    },
    /// `position` is 1-based.
    #[serde(rename_all = "camelCase")]
    Queued { plate: String, position: usize },
}

/// What a departing vehicle is billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub plate: String,
    pub slot_id: SlotId,
    pub check_in_time: Ms,
    pub check_out_time: Ms,
    pub billed_hours: u64,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub total_slots: usize,
    pub free_slots: usize,
    pub queued_vehicles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialized {
    pub added: u32,
    pub total_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    pub slot_id: SlotId,
    pub occupied: bool,
    pub plate: Option<String>,
    pub since: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub position: usize,
    pub plate: String,
    pub requested_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub plate: String,
    pub slot_id: SlotId,
    pub check_in_time: Ms,
    pub check_out_time: Option<Ms>,
    pub billed_hours: Option<u64>,
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    /// `None` for a plate the lot has never seen.
    pub vehicle_id: Option<VehicleId>,
    pub plate: String,
    pub stage: Stage,
}

/// Result of a single drain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue was empty.
    Idle,
    /// Head of queue could not be placed and went back to the head.
    NoFreeSlot,
    Seated { plate: String, slot_id: SlotId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_serializes_with_status_tag() {
        let parked = Arrival::Parked {
            plate: "AB-123".into(),
            slot_id: 1,
            free_slots_remaining: 0,
        };
        let json = serde_json::to_value(&parked).unwrap();
        assert_eq!(json["status"], "parked");
        assert_eq!(json["slotId"], 1);
        assert_eq!(json["freeSlotsRemaining"], 0);

        let queued = Arrival::Queued {
            plate: "CD-456".into(),
            position: 1,
        };
        let json = serde_json::to_value(&queued).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("slotId").is_none());
    }

    #[test]
    fn session_open_has_no_checkout() {
        let s = Session::open(Ulid::new(), 7, 3, 1_000);
        assert!(s.is_open());
        assert_eq!(s.billed_hours, None);
        assert_eq!(s.amount, None);
    }

    #[test]
    fn status_uses_camel_case() {
        let status = Status {
            total_slots: 1,
            free_slots: 0,
            queued_vehicles: 0,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"totalSlots":1,"freeSlots":0,"queuedVehicles":0}"#);
    }
}
