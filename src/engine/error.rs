use thiserror::Error;

use crate::model::{SessionId, SlotId, VehicleId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("no active session for vehicle {0}")]
    NoActiveSession(String),
    #[error("vehicle {0} is already parked")]
    AlreadyParked(String),
    #[error("vehicle {0} is already queued")]
    AlreadyQueued(String),
    #[error("vehicle {0} already has an open session")]
    SessionOpen(VehicleId),
    #[error("session {0} is already closed")]
    AlreadyClosed(SessionId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Stable, client-facing error class.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotNotFound(_)
            | EngineError::SessionNotFound(_)
            | EngineError::NoActiveSession(_) => "not_found",
            EngineError::AlreadyParked(_)
            | EngineError::AlreadyQueued(_)
            | EngineError::SessionOpen(_) => "conflict",
            EngineError::AlreadyClosed(_) => "already_closed",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "store_failure",
        }
    }

    /// Store failures are rolled back in full, so the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}
