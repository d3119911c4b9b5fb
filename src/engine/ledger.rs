use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::*;

use super::EngineError;

/// Append-only session history plus an index of the one open session per vehicle.
#[derive(Default)]
pub struct SessionLedger {
    sessions: DashMap<SessionId, Session>,
    /// Vehicle → its open session. The entry lock makes check-and-create atomic.
    open: DashMap<VehicleId, SessionId>,
    by_vehicle: DashMap<VehicleId, Vec<SessionId>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_session(
        &self,
        id: SessionId,
        vehicle_id: VehicleId,
        slot_id: SlotId,
        check_in: Ms,
    ) -> Result<SessionId, EngineError> {
        match self.open.entry(vehicle_id) {
            Entry::Occupied(_) => Err(EngineError::SessionOpen(vehicle_id)),
            Entry::Vacant(slot) => {
                self.sessions
                    .insert(id, Session::open(id, vehicle_id, slot_id, check_in));
                self.by_vehicle.entry(vehicle_id).or_default().push(id);
                slot.insert(id);
                Ok(id)
            }
        }
    }

    pub fn find_open(&self, vehicle_id: VehicleId) -> Option<Session> {
        let id = *self.open.get(&vehicle_id)?;
        self.get(&id)
    }

    /// Close a session exactly once.
    pub fn close_session(
        &self,
        id: SessionId,
        check_out: Ms,
        billed_hours: u64,
        amount: u64,
    ) -> Result<(), EngineError> {
        let vehicle_id = {
            let mut session = self
                .sessions
                .get_mut(&id)
                .ok_or(EngineError::SessionNotFound(id))?;
            if !session.is_open() {
                return Err(EngineError::AlreadyClosed(id));
            }
            session.check_out = Some(check_out);
            session.billed_hours = Some(billed_hours);
            session.amount = Some(amount);
            session.vehicle_id
        };
        self.open.remove_if(&vehicle_id, |_, open_id| *open_id == id);
        Ok(())
    }

    /// Put back a closed session read from a compacted WAL.
    pub fn restore(&self, session: Session) {
        let (id, vehicle_id) = (session.id, session.vehicle_id);
        if session.is_open() {
            self.open.insert(vehicle_id, id);
        }
        if self.sessions.insert(id, session).is_none() {
            self.by_vehicle.entry(vehicle_id).or_default().push(id);
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    /// Every session of one vehicle, oldest check-in first.
    pub fn history(&self, vehicle_id: VehicleId) -> Vec<Session> {
        let ids = self
            .by_vehicle
            .get(&vehicle_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut sessions: Vec<Session> = ids.iter().filter_map(|id| self.get(id)).collect();
        sessions.sort_by_key(|s| (s.check_in, s.id));
        sessions
    }

    /// Every session in the ledger, oldest check-in first.
    pub fn all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| (s.check_in, s.id));
        sessions
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
