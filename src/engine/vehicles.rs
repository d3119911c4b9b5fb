use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::VehicleId;

type LaneMap = DashMap<VehicleId, Arc<Mutex<()>>>;

/// Held while one vehicle's unit of work runs. Events for the same vehicle
/// are serialized; different vehicles proceed in parallel.
///
/// Dropping the last holder removes the lane from the registry.
pub struct Lane {
    id: VehicleId,
    lanes: Arc<LaneMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Lane {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of 1 means only the map is left.
        self.lanes
            .remove_if(&self.id, |_, lane| Arc::strong_count(lane) == 1);
    }
}

/// Plate ↔ vehicle id map. A plate keeps its id for the life of the lot.
///
/// [`resolve`](Self::resolve) only reserves an id. The pair becomes visible
/// to [`lookup`](Self::lookup) and [`plate`](Self::plate) once a committed
/// event passes it to [`register`](Self::register), so a failed arrival
/// leaves nothing observable behind.
pub struct VehicleRegistry {
    by_plate: DashMap<String, VehicleId>,
    plates: DashMap<VehicleId, String>,
    lanes: Arc<LaneMap>,
    next_id: AtomicU64,
}

impl Default for VehicleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self {
            by_plate: DashMap::new(),
            plates: DashMap::new(),
            lanes: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Id for `plate`, reserving one on first sight. Concurrent callers for
    /// the same plate get the same id. Never fails.
    pub fn resolve(&self, plate: &str) -> VehicleId {
        if let Some(id) = self.by_plate.get(plate) {
            return *id;
        }
        *self
            .by_plate
            .entry(plate.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Commit a plate/id pair (live events and WAL replay).
    pub fn register(&self, id: VehicleId, plate: &str) {
        self.by_plate.insert(plate.to_string(), id);
        self.plates.insert(id, plate.to_string());
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// Committed id of `plate`.
    pub fn lookup(&self, plate: &str) -> Option<VehicleId> {
        let id = *self.by_plate.get(plate)?;
        self.plates.contains_key(&id).then_some(id)
    }

    pub fn plate(&self, id: VehicleId) -> Option<String> {
        self.plates.get(&id).map(|e| e.value().clone())
    }

    /// Number of committed vehicles.
    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }

    /// Wait for exclusive use of a vehicle's lane.
    pub async fn lane(&self, id: VehicleId) -> Lane {
        let lane = self
            .lanes
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Lane {
            id,
            lanes: self.lanes.clone(),
            guard: Some(lane.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(super) fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn resolve_is_idempotent() {
        let reg = VehicleRegistry::new();
        let a = reg.resolve("AB-123");
        let b = reg.resolve("CD-456");
        assert_ne!(a, b);
        assert_eq!(reg.resolve("AB-123"), a);
    }

    #[test]
    fn reserved_id_is_hidden_until_registered() {
        let reg = VehicleRegistry::new();
        let id = reg.resolve("AB-123");
        assert_eq!(reg.lookup("AB-123"), None);
        assert_eq!(reg.plate(id), None);
        assert!(reg.is_empty());

        reg.register(id, "AB-123");
        assert_eq!(reg.lookup("AB-123"), Some(id));
        assert_eq!(reg.plate(id).as_deref(), Some("AB-123"));
        assert_eq!(reg.resolve("AB-123"), id);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_advances_id_sequence() {
        let reg = VehicleRegistry::new();
        reg.register(10, "AB-123");
        assert_eq!(reg.lookup("AB-123"), Some(10));
        assert_eq!(reg.resolve("CD-456"), 11);
    }

    #[test]
    fn unknown_plate_has_no_id() {
        let reg = VehicleRegistry::new();
        assert!(reg.lookup("ZZ-999").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_first_sightings_agree() {
        let reg = Arc::new(VehicleRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.resolve("AB-123"))
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(reg.resolve("CD-456"), ids[0] + 1);
    }

    #[tokio::test]
    async fn lane_serializes_one_vehicle() {
        let reg = Arc::new(VehicleRegistry::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let (reg, active, peak) = (reg.clone(), active.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _lane = reg.lane(1).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lanes_of_different_vehicles_are_independent() {
        let reg = VehicleRegistry::new();
        let _a = reg.lane(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), reg.lane(2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_lanes_are_dropped() {
        let reg = Arc::new(VehicleRegistry::new());
        let held = reg.lane(1).await;
        assert_eq!(reg.lane_count(), 1);

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move {
                let _lane = reg.lane(1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        waiter.await.unwrap();

        assert_eq!(reg.lane_count(), 0);
        let _again = reg.lane(1).await;
        assert_eq!(reg.lane_count(), 1);
    }
}
