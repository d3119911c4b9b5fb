use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::model::*;

use super::EngineError;

struct SlotTable {
    slots: BTreeMap<SlotId, Slot>,
    /// Ids of unoccupied slots; `pop_first` gives the lowest.
    free: BTreeSet<SlotId>,
    next_id: SlotId,
}

/// Slot occupancy truth. Every read-modify-write happens under one lock, so
/// two concurrent claims can never be handed the same slot.
pub struct SlotRegistry {
    table: Mutex<SlotTable>,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(SlotTable {
                slots: BTreeMap::new(),
                free: BTreeSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Id the next `initialize` would start from.
    pub fn next_id(&self) -> SlotId {
        self.table.lock().next_id
    }

    /// Add `count` fresh free slots. Additive: existing slots are untouched.
    /// Returns the first new id.
    pub fn initialize(&self, count: u32) -> SlotId {
        let mut table = self.table.lock();
        let first_id = table.next_id;
        add_range(&mut table, first_id, count);
        first_id
    }

    /// Add free slots `first_id..first_id + count`. Ids already present are
    /// left as they are.
    pub fn add_range(&self, first_id: SlotId, count: u32) {
        let mut table = self.table.lock();
        add_range(&mut table, first_id, count);
    }

    /// Mark the lowest-id free slot occupied and return it.
    pub fn claim_free(&self) -> Option<SlotId> {
        let mut table = self.table.lock();
        let id = table.free.pop_first()?;
        if let Some(slot) = table.slots.get_mut(&id) {
            slot.occupied = true;
        }
        Some(id)
    }

    /// Record who sits in `id`. Marks the slot occupied if it was not already
    /// (WAL replay takes this path without a prior claim).
    pub fn occupy(&self, id: SlotId, occupant: Occupant) -> Result<(), EngineError> {
        let mut table = self.table.lock();
        let slot = table
            .slots
            .get_mut(&id)
            .ok_or(EngineError::SlotNotFound(id))?;
        slot.occupied = true;
        slot.occupant = Some(occupant);
        table.free.remove(&id);
        Ok(())
    }

    /// Free a slot. Releasing a slot that is already free is a no-op.
    pub fn release(&self, id: SlotId) -> Result<(), EngineError> {
        let mut table = self.table.lock();
        let slot = table
            .slots
            .get_mut(&id)
            .ok_or(EngineError::SlotNotFound(id))?;
        slot.occupied = false;
        slot.occupant = None;
        table.free.insert(id);
        Ok(())
    }

    pub fn get(&self, id: SlotId) -> Option<Slot> {
        self.table.lock().slots.get(&id).cloned()
    }

    pub fn count_free(&self) -> usize {
        self.table.lock().free.len()
    }

    pub fn count_total(&self) -> usize {
        self.table.lock().slots.len()
    }

    /// All slots, ordered by id.
    pub fn list(&self) -> Vec<Slot> {
        self.table.lock().slots.values().cloned().collect()
    }
}

fn add_range(table: &mut SlotTable, first_id: SlotId, count: u32) {
    let end = first_id.saturating_add(count);
    for id in first_id..end {
        if !table.slots.contains_key(&id) {
            table.slots.insert(id, Slot::new(id));
            table.free.insert(id);
        }
    }
    table.next_id = table.next_id.max(end);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn occupant(plate: &str) -> Occupant {
        Occupant {
            vehicle_id: 1,
            plate: plate.into(),
            since: 0,
        }
    }

    #[test]
    fn initialize_is_additive() {
        let reg = SlotRegistry::new();
        assert_eq!(reg.initialize(2), 1);
        assert_eq!(reg.initialize(3), 3);
        assert_eq!(reg.count_total(), 5);
        assert_eq!(reg.count_free(), 5);
        assert_eq!(reg.next_id(), 6);
    }

    #[test]
    fn initialize_zero_adds_nothing() {
        let reg = SlotRegistry::new();
        assert_eq!(reg.initialize(0), 1);
        assert_eq!(reg.count_total(), 0);
        assert_eq!(reg.claim_free(), None);
    }

    #[test]
    fn claim_takes_lowest_free_id() {
        let reg = SlotRegistry::new();
        reg.initialize(3);
        assert_eq!(reg.claim_free(), Some(1));
        assert_eq!(reg.claim_free(), Some(2));
        reg.release(1).unwrap();
        assert_eq!(reg.claim_free(), Some(1));
        assert_eq!(reg.claim_free(), Some(3));
        assert_eq!(reg.claim_free(), None);
    }

    #[test]
    fn release_twice_is_a_noop() {
        let reg = SlotRegistry::new();
        reg.initialize(1);
        let id = reg.claim_free().unwrap();
        reg.release(id).unwrap();
        assert_eq!(reg.count_free(), 1);
        reg.release(id).unwrap();
        assert_eq!(reg.count_free(), 1);
        assert!(!reg.get(id).unwrap().occupied);
    }

    #[test]
    fn release_unknown_slot_is_not_found() {
        let reg = SlotRegistry::new();
        assert!(matches!(reg.release(42), Err(EngineError::SlotNotFound(42))));
    }

    #[test]
    fn occupy_without_claim_removes_from_free_set() {
        let reg = SlotRegistry::new();
        reg.initialize(2);
        reg.occupy(1, occupant("AB-123")).unwrap();
        assert_eq!(reg.count_free(), 1);
        assert_eq!(reg.claim_free(), Some(2));
        assert_eq!(reg.get(1).unwrap().occupant.unwrap().plate, "AB-123");
    }

    #[test]
    fn add_range_skips_existing_ids() {
        let reg = SlotRegistry::new();
        reg.add_range(1, 2);
        reg.claim_free();
        reg.add_range(1, 3);
        assert_eq!(reg.count_total(), 3);
        // slot 1 stays claimed
        assert_eq!(reg.count_free(), 2);
    }

    #[test]
    fn concurrent_claims_never_collide() {
        const SLOTS: u32 = 8;
        const CALLERS: usize = 32;
        let reg = Arc::new(SlotRegistry::new());
        reg.initialize(SLOTS);

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.claim_free())
            })
            .collect();
        let claimed: Vec<SlotId> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(claimed.len(), SLOTS as usize);
        let distinct: HashSet<_> = claimed.iter().collect();
        assert_eq!(distinct.len(), claimed.len());
        assert_eq!(reg.count_free(), 0);
    }
}
