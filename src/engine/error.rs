use serde::Serialize;
use ulid::Ulid;

use crate::model::{Day, HoldStatus, Ms};

/// One date a hold request could not be satisfied on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub date: Day,
    pub requested: u32,
    pub available: u32,
    pub reason: String,
}

/// One date closed by a blackout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlackedOutDate {
    pub date: Day,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient capacity: {}", describe_shortfalls(.0))]
    InsufficientCapacity(Vec<Shortfall>),

    #[error("dates unavailable: {}", describe_blackouts(.0))]
    BlackoutConflict(Vec<BlackedOutDate>),

    #[error("hold {id} is {current}, cannot move to {attempted}")]
    InvalidState {
        id: Ulid,
        current: HoldStatus,
        attempted: HoldStatus,
    },

    #[error("hold {id} expired at {expired_at}")]
    HoldExpired { id: Ulid, expired_at: Ms },

    #[error(
        "capacity {resource_id}/{date} out of range: available {available} of {max}, delta {delta}"
    )]
    OutOfRange {
        resource_id: Ulid,
        date: Day,
        available: u32,
        max: u32,
        delta: i64,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| format!("{} ({} requested, {} available)", s.date, s.requested, s.available))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_blackouts(dates: &[BlackedOutDate]) -> String {
    dates
        .iter()
        .map(|b| format!("{} ({})", b.date, b.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
