use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{ReservationId, ReservationStatus, TableId, TableStatus};
use crate::store::StoreError;

/// Caller-supplied data is malformed. Rejected before any state is read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("at least two tables are needed to combine, got {0}")]
    TooFewToCombine(usize),
    #[error("no tables given")]
    NoTables,
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    #[error("party size must be at least 1")]
    ZeroPartySize,
    #[error("duration must be a positive number of hours, got {0}")]
    BadDuration(f64),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    BadDate(String),
    #[error("invalid time {0:?}, expected HH:MM")]
    BadTime(String),
    #[error("table {0} listed more than once")]
    DuplicateTable(TableId),
    #[error("reservation cannot go from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

/// Why a table refused a combine/separate/status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    Occupied,
    ActiveOrder,
    NotAvailable(TableStatus),
    AlreadyCombined,
}

impl IneligibleReason {
    /// Stable reason code for callers that map errors to UI messages.
    pub fn code(&self) -> &'static str {
        match self {
            IneligibleReason::Occupied => "occupied",
            IneligibleReason::ActiveOrder => "active_order",
            IneligibleReason::NotAvailable(_) => "not_available",
            IneligibleReason::AlreadyCombined => "already_combined",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Occupied => f.write_str("table is occupied"),
            IneligibleReason::ActiveOrder => f.write_str("table has an active order"),
            IneligibleReason::NotAvailable(status) => write!(f, "table is {status}"),
            IneligibleReason::AlreadyCombined => f.write_str("table is already combined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("table {table}: {reason}")]
    Ineligible {
        table: TableId,
        reason: IneligibleReason,
    },
    #[error("table {0} is occupied")]
    Occupied(TableId),
    #[error("table not found: {0}")]
    NotFound(TableId),
    #[error("table already exists: {0}")]
    AlreadyExists(TableId),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("table {table}: {reason}")]
    Ineligible {
        table: TableId,
        reason: IneligibleReason,
    },
    #[error("table {0} is occupied")]
    Occupied(TableId),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("table {table} is held by reservation {reservation} at that time")]
    Conflict {
        table: TableId,
        reservation: ReservationId,
    },
    #[error("a {0} reservation cannot be rescheduled")]
    NotReschedulable(ReservationStatus),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Validation(v) => EngineError::Validation(v),
            RegistryError::Ineligible { table, reason } => EngineError::Ineligible { table, reason },
            RegistryError::Occupied(id) => EngineError::Occupied(id),
            RegistryError::NotFound(id) => EngineError::NotFound(id),
            RegistryError::AlreadyExists(id) => EngineError::AlreadyExists(id),
        }
    }
}

impl EngineError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Ineligible { .. } | EngineError::Occupied(_) => "ineligible",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotReschedulable(_) => "invalid_state",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }
}
