use tracing::warn;

use crate::model::*;

use super::EngineError;
use super::ledger::SessionLedger;
use super::queue::WaitQueue;
use super::slots::SlotRegistry;
use super::vehicles::VehicleRegistry;

/// The in-memory stores behind one lot. All durable state is rebuilt from the
/// WAL by feeding its events through [`Stores::apply_event`].
#[derive(Default)]
pub struct Stores {
    pub slots: SlotRegistry,
    pub queue: WaitQueue,
    pub ledger: SessionLedger,
    pub vehicles: VehicleRegistry,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from a WAL replay. Events that no longer apply are
    /// logged and skipped.
    pub fn from_events(events: &[Event]) -> Self {
        let stores = Self::new();
        for event in events {
            if let Err(e) = stores.apply_event(event) {
                warn!("replay: skipping {event:?}: {e}");
            }
        }
        stores
    }

    pub fn apply_event(&self, event: &Event) -> Result<(), EngineError> {
        match event {
            Event::SlotsAdded { first_id, count } => {
                self.slots.add_range(*first_id, *count);
            }
            Event::VehicleQueued {
                vehicle_id,
                plate,
                requested_at,
            } => {
                self.vehicles.register(*vehicle_id, plate);
                self.queue.enqueue(QueueEntry {
                    vehicle_id: *vehicle_id,
                    plate: plate.clone(),
                    requested_at: *requested_at,
                });
            }
            Event::Parked {
                session_id,
                vehicle_id,
                plate,
                slot_id,
                check_in,
            } => {
                self.vehicles.register(*vehicle_id, plate);
                self.seat(*session_id, *vehicle_id, plate, *slot_id, *check_in)?;
            }
            Event::Seated {
                session_id,
                vehicle_id,
                plate,
                slot_id,
                check_in,
            } => {
                self.seat(*session_id, *vehicle_id, plate, *slot_id, *check_in)?;
                self.queue.settle(*vehicle_id);
            }
            Event::Departed {
                session_id,
                slot_id,
                check_out,
                billed_hours,
                amount,
                ..
            } => {
                self.ledger
                    .close_session(*session_id, *check_out, *billed_hours, *amount)?;
                self.slots.release(*slot_id)?;
            }
            Event::SessionArchived { session, plate } => {
                self.vehicles.register(session.vehicle_id, plate);
                self.ledger.restore(session.clone());
            }
        }
        Ok(())
    }

    fn seat(
        &self,
        session_id: SessionId,
        vehicle_id: VehicleId,
        plate: &str,
        slot_id: SlotId,
        check_in: Ms,
    ) -> Result<(), EngineError> {
        if self.slots.get(slot_id).is_none() {
            return Err(EngineError::SlotNotFound(slot_id));
        }
        self.ledger
            .open_session(session_id, vehicle_id, slot_id, check_in)?;
        self.slots.occupy(
            slot_id,
            Occupant {
                vehicle_id,
                plate: plate.to_string(),
                since: check_in,
            },
        )
    }

    /// Minimal event list that recreates the current state.
    ///
    /// Only meaningful while no unit of work is in flight; the engine calls it
    /// under its checkpoint lock.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        // Slot ids as contiguous runs.
        let mut run: Option<(SlotId, u32)> = None;
        for slot in self.slots.list() {
            run = match run {
                Some((first, count)) if first + count == slot.id => Some((first, count + 1)),
                Some((first, count)) => {
                    events.push(Event::SlotsAdded { first_id: first, count });
                    Some((slot.id, 1))
                }
                None => Some((slot.id, 1)),
            };
        }
        if let Some((first_id, count)) = run {
            events.push(Event::SlotsAdded { first_id, count });
        }

        for session in self.ledger.all() {
            let plate = self.vehicles.plate(session.vehicle_id).unwrap_or_default();
            if session.is_open() {
                events.push(Event::Parked {
                    session_id: session.id,
                    vehicle_id: session.vehicle_id,
                    plate,
                    slot_id: session.slot_id,
                    check_in: session.check_in,
                });
            } else {
                events.push(Event::SessionArchived { session, plate });
            }
        }

        for entry in self.queue.list() {
            events.push(Event::VehicleQueued {
                vehicle_id: entry.vehicle_id,
                plate: entry.plate,
                requested_at: entry.requested_at,
            });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    fn parked(vehicle_id: VehicleId, plate: &str, slot_id: SlotId, check_in: Ms) -> (SessionId, Event) {
        let session_id = Ulid::new();
        (
            session_id,
            Event::Parked {
                session_id,
                vehicle_id,
                plate: plate.into(),
                slot_id,
                check_in,
            },
        )
    }

    #[test]
    fn replay_builds_all_stores() {
        let (s1, park) = parked(1, "AB-123", 1, 1_000);
        let events = vec![
            Event::SlotsAdded { first_id: 1, count: 2 },
            park,
            Event::VehicleQueued {
                vehicle_id: 2,
                plate: "CD-456".into(),
                requested_at: 2_000,
            },
            Event::Departed {
                session_id: s1,
                vehicle_id: 1,
                slot_id: 1,
                check_out: 5_000,
                billed_hours: 1,
                amount: 50,
            },
        ];
        let stores = Stores::from_events(&events);

        assert_eq!(stores.slots.count_total(), 2);
        assert_eq!(stores.slots.count_free(), 2);
        assert_eq!(stores.queue.len(), 1);
        assert_eq!(stores.vehicles.lookup("CD-456"), Some(2));
        let history = stores.ledger.history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, Some(50));
    }

    #[test]
    fn seated_event_takes_vehicle_out_of_queue() {
        let session_id = Ulid::new();
        let events = vec![
            Event::SlotsAdded { first_id: 1, count: 1 },
            Event::VehicleQueued {
                vehicle_id: 7,
                plate: "CD-456".into(),
                requested_at: 2_000,
            },
            Event::Seated {
                session_id,
                vehicle_id: 7,
                plate: "CD-456".into(),
                slot_id: 1,
                check_in: 2_000,
            },
        ];
        let stores = Stores::from_events(&events);
        assert!(stores.queue.is_empty());
        assert_eq!(stores.ledger.find_open(7).unwrap().id, session_id);
        let slot = stores.slots.get(1).unwrap();
        assert!(slot.occupied);
        assert_eq!(slot.occupant.unwrap().plate, "CD-456");
    }

    #[test]
    fn parked_on_unknown_slot_is_skipped() {
        let (_, park) = parked(1, "AB-123", 9, 0);
        let stores = Stores::from_events(&[park]);
        assert!(stores.ledger.find_open(1).is_none());
        assert_eq!(stores.slots.count_total(), 0);
    }

    #[test]
    fn snapshot_round_trips_state() {
        let (s1, park1) = parked(1, "AB-123", 1, 1_000);
        let (_, park2) = parked(2, "CD-456", 3, 1_500);
        let events = vec![
            Event::SlotsAdded { first_id: 1, count: 3 },
            park1,
            Event::Departed {
                session_id: s1,
                vehicle_id: 1,
                slot_id: 1,
                check_out: 9_000,
                billed_hours: 1,
                amount: 50,
            },
            park2,
            Event::VehicleQueued {
                vehicle_id: 3,
                plate: "EF-789".into(),
                requested_at: 3_000,
            },
            Event::VehicleQueued {
                vehicle_id: 4,
                plate: "GH-012".into(),
                requested_at: 4_000,
            },
        ];
        let original = Stores::from_events(&events);
        let snapshot = original.snapshot_events();
        assert!(snapshot.len() < events.len());

        let rebuilt = Stores::from_events(&snapshot);
        assert_eq!(rebuilt.slots.list(), original.slots.list());
        assert_eq!(rebuilt.ledger.all(), original.ledger.all());
        assert_eq!(rebuilt.queue.list(), original.queue.list());
        assert_eq!(rebuilt.vehicles.lookup("AB-123"), Some(1));
        assert_eq!(rebuilt.vehicles.resolve("ZZ-000"), 5);
    }

    #[test]
    fn snapshot_splits_non_contiguous_slot_ids() {
        let stores = Stores::new();
        stores.slots.add_range(1, 2);
        stores.slots.add_range(10, 2);
        let snapshot = stores.snapshot_events();
        assert_eq!(
            snapshot,
            vec![
                Event::SlotsAdded { first_id: 1, count: 2 },
                Event::SlotsAdded { first_id: 10, count: 2 },
            ]
        );
    }
}
