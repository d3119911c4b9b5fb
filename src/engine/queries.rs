use crate::model::*;

use super::Engine;

impl Engine {
    /// Lot counters. A drain moves a vehicle out of the queue and into a slot
    /// in two steps, so this waits for any drain in flight to finish.
    pub async fn status(&self) -> Status {
        let _drain = self.drain_gate.lock().await;
        Status {
            total_slots: self.stores.slots.count_total(),
            free_slots: self.stores.slots.count_free(),
            queued_vehicles: self.stores.queue.len(),
        }
    }

    /// Every slot with its occupant, ordered by id.
    pub fn list_slots(&self) -> Vec<SlotInfo> {
        self.stores
            .slots
            .list()
            .into_iter()
            .map(|slot| SlotInfo {
                slot_id: slot.id,
                occupied: slot.occupied,
                plate: slot.occupant.as_ref().map(|o| o.plate.clone()),
                since: slot.occupant.map(|o| o.since),
            })
            .collect()
    }

    /// Vehicles in line, head first. A vehicle popped by an in-flight drain
    /// is not listed.
    pub fn list_queue(&self) -> Vec<QueueInfo> {
        self.stores
            .queue
            .list()
            .into_iter()
            .enumerate()
            .map(|(i, entry)| QueueInfo {
                position: i + 1,
                plate: entry.plate,
                requested_at: entry.requested_at,
            })
            .collect()
    }

    /// Session history, oldest check-in first: one vehicle's when `plate` is
    /// given, otherwise the whole lot's. An unknown plate has no history.
    pub fn sessions(&self, plate: Option<&str>) -> Vec<SessionInfo> {
        let sessions = match plate.map(str::trim) {
            Some(plate) => match self.stores.vehicles.lookup(plate) {
                Some(vehicle_id) => self.stores.ledger.history(vehicle_id),
                None => return Vec::new(),
            },
            None => self.stores.ledger.all(),
        };
        sessions
            .into_iter()
            .map(|s| SessionInfo {
                session_id: s.id,
                plate: self.stores.vehicles.plate(s.vehicle_id).unwrap_or_default(),
                slot_id: s.slot_id,
                check_in_time: s.check_in,
                check_out_time: s.check_out,
                billed_hours: s.billed_hours,
                amount: s.amount,
            })
            .collect()
    }

    /// Where `plate` is in its lifeline.
    pub fn vehicle(&self, plate: &str) -> VehicleInfo {
        let plate = plate.trim();
        let Some(vehicle_id) = self.stores.vehicles.lookup(plate) else {
            return VehicleInfo {
                vehicle_id: None,
                plate: plate.to_string(),
                stage: Stage::NoSession,
            };
        };
        VehicleInfo {
            vehicle_id: Some(vehicle_id),
            plate: plate.to_string(),
            stage: self.stage_of(vehicle_id),
        }
    }

    fn stage_of(&self, vehicle_id: VehicleId) -> Stage {
        if self.stores.ledger.find_open(vehicle_id).is_some() {
            Stage::Occupying
        } else if self.stores.queue.contains(vehicle_id) {
            Stage::Queued
        } else if self.stores.ledger.history(vehicle_id).is_empty() {
            Stage::NoSession
        } else {
            Stage::Closed
        }
    }
}
