use tokio::sync::oneshot;
use tracing::{debug, error};
use ulid::Ulid;

use crate::drainer::DrainTask;
use crate::limits::*;
use crate::model::*;
use crate::observability::{ARRIVALS_TOTAL, DEPARTURES_TOTAL, DRAINS_TOTAL, REVENUE_TOTAL};

use super::{Engine, EngineError, WalCommand, validate_plate, validate_timestamp};

impl Engine {
    /// Park `plate` in the lowest free slot, or put it at the back of the queue.
    ///
    /// `requested_at` defaults to now and becomes the session's check-in,
    /// including when the vehicle is seated later from the queue.
    pub async fn arrive(&self, plate: &str, requested_at: Option<Ms>) -> Result<Arrival, EngineError> {
        let plate = validate_plate(plate)?;
        let requested_at = match requested_at {
            Some(ts) => validate_timestamp(ts)?,
            None => self.clock.now_ms(),
        };

        let _checkpoint = self.checkpoint.read().await;
        let vehicle_id = self.stores.vehicles.resolve(plate);
        let _lane = self.stores.vehicles.lane(vehicle_id).await;

        if self.stores.ledger.find_open(vehicle_id).is_some() {
            return Err(EngineError::AlreadyParked(plate.to_string()));
        }
        if self.stores.queue.contains(vehicle_id) {
            return Err(EngineError::AlreadyQueued(plate.to_string()));
        }

        if let Some(slot_id) = self.stores.slots.claim_free() {
            let event = Event::Parked {
                session_id: Ulid::new(),
                vehicle_id,
                plate: plate.to_string(),
                slot_id,
                check_in: requested_at,
            };
            if let Err(e) = self.wal_append(&event).await {
                self.release_claim(slot_id);
                return Err(e);
            }
            self.stores.apply_event(&event)?;
            metrics::counter!(ARRIVALS_TOTAL, "outcome" => "parked").increment(1);
            self.publish_gauges();
            return Ok(Arrival::Parked {
                plate: plate.to_string(),
                slot_id,
                free_slots_remaining: self.stores.slots.count_free(),
            });
        }

        let _tail = self.stores.queue.tail().await;
        if self.stores.queue.len() >= MAX_QUEUE_LEN {
            return Err(EngineError::LimitExceeded("wait queue is full"));
        }
        let entry = QueueEntry {
            vehicle_id,
            plate: plate.to_string(),
            requested_at,
        };
        self.wal_append(&Event::VehicleQueued {
            vehicle_id,
            plate: entry.plate.clone(),
            requested_at,
        })
        .await?;
        let position = self.stores.queue.enqueue(entry);
        metrics::counter!(ARRIVALS_TOTAL, "outcome" => "queued").increment(1);
        self.publish_gauges();

        // A departure may have freed a slot between our claim and the enqueue.
        if self.stores.slots.count_free() > 0 {
            self.drains.schedule(DrainTask::QueueJoined);
        }
        Ok(Arrival::Queued {
            plate: plate.to_string(),
            position,
        })
    }

    /// Close the vehicle's open session, bill it and free the slot. Seating
    /// the next queued vehicle happens in the background.
    pub async fn depart(&self, plate: &str) -> Result<Receipt, EngineError> {
        let plate = validate_plate(plate)?;

        let _checkpoint = self.checkpoint.read().await;
        let no_session = || EngineError::NoActiveSession(plate.to_string());
        let vehicle_id = self.stores.vehicles.lookup(plate).ok_or_else(no_session)?;
        let _lane = self.stores.vehicles.lane(vehicle_id).await;
        let session = self.stores.ledger.find_open(vehicle_id).ok_or_else(no_session)?;

        let check_out = self.clock.now_ms();
        let bill = self.tariff.bill(session.check_in, check_out);
        self.persist_and_apply(&Event::Departed {
            session_id: session.id,
            vehicle_id,
            slot_id: session.slot_id,
            check_out,
            billed_hours: bill.billed_hours,
            amount: bill.amount,
        })
        .await?;

        metrics::counter!(DEPARTURES_TOTAL).increment(1);
        metrics::counter!(REVENUE_TOTAL).increment(bill.amount);
        self.publish_gauges();
        self.drains.schedule(DrainTask::SlotReleased(session.slot_id));

        Ok(Receipt {
            plate: plate.to_string(),
            slot_id: session.slot_id,
            check_in_time: session.check_in,
            check_out_time: check_out,
            billed_hours: bill.billed_hours,
            amount: bill.amount,
        })
    }

    /// Try to seat the head of the queue. Safe to call redundantly.
    ///
    /// If no slot is free, or the WAL write fails, the popped vehicle goes
    /// back to the head of the queue.
    pub async fn drain(&self) -> Result<DrainOutcome, EngineError> {
        let _checkpoint = self.checkpoint.read().await;
        let _drain = self.drain_gate.lock().await;

        let Some(entry) = self.stores.queue.dequeue() else {
            return Ok(DrainOutcome::Idle);
        };
        let _lane = self.stores.vehicles.lane(entry.vehicle_id).await;

        let Some(slot_id) = self.stores.slots.claim_free() else {
            self.stores.queue.requeue_front(entry);
            metrics::counter!(DRAINS_TOTAL, "outcome" => "no_free_slot").increment(1);
            return Ok(DrainOutcome::NoFreeSlot);
        };

        let event = Event::Seated {
            session_id: Ulid::new(),
            vehicle_id: entry.vehicle_id,
            plate: entry.plate.clone(),
            slot_id,
            check_in: entry.requested_at,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.release_claim(slot_id);
            self.stores.queue.requeue_front(entry);
            metrics::counter!(DRAINS_TOTAL, "outcome" => "failed").increment(1);
            return Err(e);
        }
        self.stores.apply_event(&event)?;

        metrics::counter!(DRAINS_TOTAL, "outcome" => "seated").increment(1);
        self.publish_gauges();
        debug!("seated {} in slot {slot_id}", entry.plate);
        Ok(DrainOutcome::Seated {
            plate: entry.plate,
            slot_id,
        })
    }

    /// Drain until the queue is empty or no slot is free. Returns how many
    /// vehicles were seated.
    pub async fn drain_all(&self) -> Result<usize, EngineError> {
        let mut seated = 0;
        while let DrainOutcome::Seated { .. } = self.drain().await? {
            seated += 1;
        }
        Ok(seated)
    }

    /// Add `count` new free slots after the existing ones.
    pub async fn initialize_slots(&self, count: i64) -> Result<Initialized, EngineError> {
        if count < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "slot count must not be negative, got {count}"
            )));
        }
        let count = u32::try_from(count)
            .ok()
            .filter(|c| *c <= MAX_SLOTS)
            .ok_or(EngineError::LimitExceeded("too many slots"))?;

        let _checkpoint = self.checkpoint.read().await;
        let _gate = self.slot_gate.lock().await;

        let total = self.stores.slots.count_total();
        if total + count as usize > MAX_SLOTS as usize {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if count > 0 {
            let first_id = self.stores.slots.next_id();
            self.persist_and_apply(&Event::SlotsAdded { first_id, count })
                .await?;
            self.publish_gauges();
            self.drains.schedule(DrainTask::SlotsAdded(count));
        }

        Ok(Initialized {
            added: count,
            total_slots: self.stores.slots.count_total(),
        })
    }

    /// Rewrite the WAL as the minimal event list for the current state.
    ///
    /// Holds the checkpoint exclusively, so no unit of work is half done while
    /// the snapshot is taken or while the file is swapped.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _checkpoint = self.checkpoint.write().await;
        let events = self.stores.snapshot_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Undo a slot claim whose WAL write failed.
    fn release_claim(&self, slot_id: SlotId) {
        if let Err(e) = self.stores.slots.release(slot_id) {
            error!("rollback of slot {slot_id} failed: {e}");
        }
    }
}
