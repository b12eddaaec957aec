use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Read-only view over one consistent snapshot of a tenant's tables and
/// reservations.
///
/// Blocking follows each reservation's `table_ids` exactly. Combined
/// partners are not expanded here: a caller that wants a whole group held
/// must book the whole group.
///
/// Every query is a linear scan of the reservation list. Tenants hold tens
/// to low hundreds of records, so there is no index.
pub struct AvailabilityResolver<'a> {
    tables: &'a [Table],
    reservations: Vec<&'a Reservation>,
}

impl<'a> AvailabilityResolver<'a> {
    pub fn new(tables: &'a [Table], reservations: impl IntoIterator<Item = &'a Reservation>) -> Self {
        Self {
            tables,
            reservations: reservations.into_iter().collect(),
        }
    }

    /// Active reservations whose slot overlaps `slot`, whatever date they
    /// were booked on.
    fn overlapping(&self, slot: &Slot) -> impl Iterator<Item = &'a Reservation> + '_ {
        let slot = *slot;
        self.reservations
            .iter()
            .copied()
            .filter(move |r| r.status.is_active() && slot.overlaps(&r.slot()))
    }

    /// Ids of every table held by a reservation on the slot's date that
    /// overlaps `slot`.
    pub fn blocked_tables(&self, slot: &Slot) -> BTreeSet<TableId> {
        let date = slot.date();
        self.overlapping(slot)
            .filter(|r| r.date == date)
            .flat_map(|r| r.table_ids.iter().copied())
            .collect()
    }

    /// Tables free for a new reservation starting at `date` + `time` and
    /// lasting `duration_hours`. Input order is preserved.
    ///
    /// Assumes `duration_hours > 0`; the engine validates before calling.
    pub fn free_tables(&self, date: NaiveDate, time: NaiveTime, duration_hours: f64) -> Vec<Table> {
        let request = Slot::starting_at(date, time, duration_hours);
        let blocked = self.blocked_tables(&request);
        self.tables
            .iter()
            .filter(|t| !blocked.contains(&t.id))
            .cloned()
            .collect()
    }

    /// Every `(table, reservation)` pair that would collide with booking
    /// `table_ids` for `slot`. Unlike [`Self::free_tables`] this also sees
    /// reservations from earlier dates that run past midnight. `exclude`
    /// skips one reservation, used when rescheduling it.
    pub fn conflicts(
        &self,
        slot: &Slot,
        table_ids: &[TableId],
        exclude: Option<ReservationId>,
    ) -> Vec<(TableId, ReservationId)> {
        let mut hits = Vec::new();
        for r in self.overlapping(slot) {
            if Some(r.id) == exclude {
                continue;
            }
            for t in table_ids {
                if r.holds_table(t) {
                    hits.push((*t, r.id));
                }
            }
        }
        hits
    }
}

/// Free-function form of [`AvailabilityResolver::free_tables`].
pub fn free_tables(
    date: NaiveDate,
    time: NaiveTime,
    duration_hours: f64,
    tables: &[Table],
    reservations: &[Reservation],
) -> Vec<Table> {
    AvailabilityResolver::new(tables, reservations).free_tables(date, time, duration_hours)
}
