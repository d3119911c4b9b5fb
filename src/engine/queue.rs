use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::MutexGuard;

use crate::model::*;

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// Vehicles in `entries` plus any popped by a drain that has not yet
    /// committed or requeued.
    members: HashSet<VehicleId>,
}

/// FIFO of vehicles waiting for a slot.
///
/// Appends that must be durable take the [`tail`](Self::tail) gate first and
/// hold it across the WAL write, so on-disk order and queue order agree.
#[derive(Default)]
pub struct WaitQueue {
    state: Mutex<QueueState>,
    tail: tokio::sync::Mutex<()>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single append point.
    pub async fn tail(&self) -> MutexGuard<'_, ()> {
        self.tail.lock().await
    }

    /// Append to the tail. Returns the 1-based position.
    pub fn enqueue(&self, entry: QueueEntry) -> usize {
        let mut state = self.state.lock();
        state.members.insert(entry.vehicle_id);
        state.entries.push_back(entry);
        state.entries.len()
    }

    /// Pop the head. The vehicle still counts as queued until [`settle`](Self::settle)
    /// or [`requeue_front`](Self::requeue_front).
    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.state.lock().entries.pop_front()
    }

    /// Put a popped entry back at the head.
    pub fn requeue_front(&self, entry: QueueEntry) {
        let mut state = self.state.lock();
        state.members.insert(entry.vehicle_id);
        state.entries.push_front(entry);
    }

    /// Drop a vehicle from the queue, wherever it is, including an in-flight
    /// pop. Returns the entry if it was still in line.
    pub fn settle(&self, vehicle_id: VehicleId) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        state.members.remove(&vehicle_id);
        let pos = state.entries.iter().position(|e| e.vehicle_id == vehicle_id)?;
        state.entries.remove(pos)
    }

    pub fn contains(&self, vehicle_id: VehicleId) -> bool {
        self.state.lock().members.contains(&vehicle_id)
    }

    /// Vehicles waiting, including one popped by an in-flight drain.
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in line, head first.
    pub fn list(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }
}
