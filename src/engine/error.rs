use ulid::Ulid;

use crate::model::ResourceStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed time string or `end <= start`.
    InvalidRange(&'static str),
    /// The date string does not name a real calendar date.
    InvalidDate(String),
    /// The recurrence rule cannot generate a valid sequence.
    InvalidRecurrence(&'static str),
    /// The candidate range would push the resource past capacity.
    SlotTaken { conflict_with: Ulid },
    /// Stale optimistic-concurrency token; re-fetch and retry.
    VersionMismatch { current: u64, presented: u64 },
    /// Disallowed booking/series status transition.
    InvalidTransition { from: &'static str, to: &'static str },
    /// Resource is in maintenance or retired.
    ResourceUnavailable { id: Ulid, status: ResourceStatus },
    Forbidden(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Resource still has future non-cancelled bookings.
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            EngineError::InvalidDate(s) => write!(f, "invalid date: {s}"),
            EngineError::InvalidRecurrence(msg) => write!(f, "invalid recurrence: {msg}"),
            EngineError::SlotTaken { conflict_with } => {
                write!(f, "slot taken: conflicts with booking {conflict_with}")
            }
            EngineError::VersionMismatch { current, presented } => {
                write!(f, "version mismatch: current {current}, presented {presented}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::ResourceUnavailable { id, status } => {
                write!(f, "resource {id} unavailable: {}", status.as_str())
            }
            EngineError::Forbidden(what) => write!(f, "forbidden: {what}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasBookings(id) => {
                write!(f, "resource {id} still has future bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
