use std::collections::BTreeSet;

use chrono::TimeDelta;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, ValidationError};

pub(crate) fn validate_duration(duration_hours: f64) -> Result<(), EngineError> {
    if !duration_hours.is_finite() || hours(duration_hours) <= TimeDelta::zero() {
        return Err(ValidationError::BadDuration(duration_hours).into());
    }
    if duration_hours > MAX_DURATION_HOURS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Deduplicating conversion for combine/separate input. A repeated id is a
/// caller mistake, not something to silently collapse.
pub(crate) fn table_set(ids: &[TableId]) -> Result<BTreeSet<TableId>, EngineError> {
    if ids.len() > MAX_TABLES_PER_GROUP {
        return Err(EngineError::LimitExceeded("too many tables in one request"));
    }
    let mut set = BTreeSet::new();
    for id in ids {
        if !set.insert(*id) {
            return Err(ValidationError::DuplicateTable(*id).into());
        }
    }
    Ok(set)
}

/// Checks on a reservation request that do not need the current state.
pub(crate) fn validate_request(req: &ReservationRequest) -> Result<(), EngineError> {
    if req.party_size == 0 {
        return Err(ValidationError::ZeroPartySize.into());
    }
    if req.party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    validate_duration(req.duration_hours)?;
    if req.table_ids.is_empty() {
        return Err(ValidationError::NoTables.into());
    }
    table_set(&req.table_ids)?;
    validate_text(&req.customer_name, MAX_NAME_LEN, "customer name too long")?;
    if let Some(ref phone) = req.phone {
        validate_text(phone, MAX_NAME_LEN, "phone too long")?;
    }
    if let Some(ref notes) = req.notes {
        validate_text(notes, MAX_NOTES_LEN, "notes too long")?;
    }
    Ok(())
}
