use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::ValidationError;

pub type TableId = Ulid;
pub type ReservationId = Ulid;
pub type OrderId = Ulid;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Convert a (possibly fractional) number of hours to whole milliseconds,
/// saturating at the ends of the `TimeDelta` range.
pub fn hours(h: f64) -> TimeDelta {
    let ms = (h * MS_PER_HOUR).round() as i64;
    TimeDelta::try_milliseconds(ms).unwrap_or(if ms < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

/// Half-open wall-clock interval `[start, end)`. Timezone-naive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    /// An empty or inverted slot is representable and overlaps nothing;
    /// callers validate durations before building one.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// `date` + `time` for `duration_hours`, all in the same local frame.
    /// The end clamps to the calendar's limits instead of overflowing.
    pub fn starting_at(date: NaiveDate, time: NaiveTime, duration_hours: f64) -> Self {
        let start = date.and_time(time);
        let delta = hours(duration_hours);
        let end = start.checked_add_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
            NaiveDateTime::MIN
        } else {
            NaiveDateTime::MAX
        });
        Self::new(start, end)
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Back-to-back slots (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Wall-clock parsing ───────────────────────────────────────────

pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::BadDate(s.to_string()))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ValidationError::BadTime(s.to_string()))
}

// ── Tables ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Cleaning,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Reserved => "reserved",
            TableStatus::Cleaning => "cleaning",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table record as the record store sees it.
///
/// `combined_with` is a denormalized view: the registry keeps the
/// combination graph as a single edge set and fills this field in when it
/// hands records out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub capacity: u32,
    pub status: TableStatus,
    pub section: String,
    pub combined_with: BTreeSet<TableId>,
    pub current_order_id: Option<OrderId>,
    pub reservation_id: Option<ReservationId>,
}

impl Table {
    pub fn new(id: TableId, name: impl Into<String>, capacity: u32, section: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            capacity,
            status: TableStatus::Available,
            section: section.into(),
            combined_with: BTreeSet::new(),
            current_order_id: None,
            reservation_id: None,
        }
    }

    pub fn is_combined(&self) -> bool {
        !self.combined_with.is_empty()
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Statuses whose slot still holds its tables.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed | ReservationStatus::Seated
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Pending → Confirmed → Seated → Completed; anything not yet seated
    /// may be cancelled or marked a no-show.
    pub fn can_become(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending | Confirmed, Seated)
                | (Pending | Confirmed, Cancelled)
                | (Pending | Confirmed, NoShow)
                | (Seated, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Seated => "seated",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub customer_name: String,
    pub phone: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_hours: f64,
    pub party_size: u32,
    /// Assigned tables, in the order the caller listed them.
    pub table_ids: Vec<TableId>,
    pub status: ReservationStatus,
    pub notes: Option<String>,
}

impl Reservation {
    pub fn slot(&self) -> Slot {
        Slot::starting_at(self.date, self.time, self.duration_hours)
    }

    pub fn holds_table(&self, table: &TableId) -> bool {
        self.table_ids.contains(table)
    }
}

/// Input for a new reservation. Validated by the engine before anything
/// touches the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub id: ReservationId,
    pub customer_name: String,
    pub phone: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_hours: f64,
    pub party_size: u32,
    pub table_ids: Vec<TableId>,
    pub notes: Option<String>,
}

impl ReservationRequest {
    pub fn slot(&self) -> Slot {
        Slot::starting_at(self.date, self.time, self.duration_hours)
    }

    pub(crate) fn into_reservation(self) -> Reservation {
        Reservation {
            id: self.id,
            customer_name: self.customer_name,
            phone: self.phone,
            date: self.date,
            time: self.time,
            duration_hours: self.duration_hours,
            party_size: self.party_size,
            table_ids: self.table_ids,
            status: ReservationStatus::Pending,
            notes: self.notes,
        }
    }
}

// ── Changes ──────────────────────────────────────────────────────

/// One committed record change. This is both the journal record format
/// and the notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    TableUpserted(Table),
    TableDeleted { id: TableId },
    ReservationUpserted(Reservation),
}

impl Change {
    /// Tables a subscriber might care about for this change.
    pub fn table_ids(&self) -> Vec<TableId> {
        match self {
            Change::TableUpserted(t) => vec![t.id],
            Change::TableDeleted { id } => vec![*id],
            Change::ReservationUpserted(r) => r.table_ids.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
