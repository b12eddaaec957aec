use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::availability::AvailabilityResolver;
use super::validate::{table_set, validate_duration, validate_request, validate_text};
use super::{Cafe, CafeState, EngineError, ValidationError};

impl CafeState {
    fn require_tables(&self, ids: &[TableId]) -> Result<(), EngineError> {
        match ids.iter().find(|id| !self.registry.contains(id)) {
            Some(missing) => Err(EngineError::NotFound(*missing)),
            None => Ok(()),
        }
    }

    /// First reservation already holding one of `table_ids` during `slot`.
    fn check_conflicts(
        &self,
        slot: &Slot,
        table_ids: &[TableId],
        exclude: Option<ReservationId>,
    ) -> Result<(), EngineError> {
        let tables = self.registry.tables();
        let resolver = AvailabilityResolver::new(&tables, self.reservations.values());
        if let Some(&(table, reservation)) = resolver.conflicts(slot, table_ids, exclude).first() {
            return Err(EngineError::Conflict { table, reservation });
        }
        Ok(())
    }

    /// Point tables left without a back-reference at the earliest pending
    /// or confirmed reservation that still books them.
    fn reassign_holds(&mut self, tables: &[TableId]) -> Vec<TableId> {
        let mut changed = Vec::new();
        for table in tables {
            if self.registry.get(table).is_none_or(|t| t.reservation_id.is_some()) {
                continue;
            }
            let next = self
                .reservations
                .values()
                .filter(|r| {
                    matches!(r.status, ReservationStatus::Pending | ReservationStatus::Confirmed)
                        && r.holds_table(table)
                })
                .min_by_key(|r| (r.slot().start, r.id))
                .map(|r| r.id);
            if let Some(next) = next {
                changed.extend(self.registry.assign_reservation(next, &[*table]));
            }
        }
        changed
    }

    fn reservation(&self, id: &ReservationId) -> Result<&Reservation, EngineError> {
        self.reservations.get(id).ok_or(EngineError::NotFound(*id))
    }
}

impl Cafe {
    // ── Tables ───────────────────────────────────────────────

    pub async fn add_table(
        &self,
        id: TableId,
        name: impl Into<String>,
        capacity: u32,
        section: impl Into<String>,
    ) -> Result<Table, EngineError> {
        let table = Table::new(id, name, capacity, section);
        validate_text(&table.name, MAX_NAME_LEN, "table name too long")?;
        validate_text(&table.section, MAX_NAME_LEN, "section name too long")?;

        let table = self
            .mutate("add_table", |state| {
                if state.registry.len() >= MAX_TABLES_PER_TENANT {
                    return Err(EngineError::LimitExceeded("too many tables"));
                }
                state.registry.add(table)?;
                let changes = state.table_upserts([id]);
                let table = state.registry.get(&id).ok_or(EngineError::NotFound(id))?;
                Ok((table, changes))
            })
            .await?;
        info!(tenant = %self.tenant(), table = %id, name = %table.name, "table added");
        Ok(table)
    }

    /// Rename, resize or move a table. `None` leaves a field as it is.
    pub async fn update_table(
        &self,
        id: TableId,
        name: Option<String>,
        capacity: Option<u32>,
        section: Option<String>,
    ) -> Result<Table, EngineError> {
        if let Some(ref n) = name {
            validate_text(n, MAX_NAME_LEN, "table name too long")?;
        }
        if let Some(ref s) = section {
            validate_text(s, MAX_NAME_LEN, "section name too long")?;
        }
        self.mutate("update_table", |state| {
            state.registry.update_details(&id, name, capacity, section)?;
            let changes = state.table_upserts([id]);
            let table = state.registry.get(&id).ok_or(EngineError::NotFound(id))?;
            Ok((table, changes))
        })
        .await
    }

    /// Remove a table. Refused while it is occupied or serving an order;
    /// its partners lose it from their combination.
    pub async fn delete_table(&self, id: TableId) -> Result<(), EngineError> {
        self.mutate("delete_table", |state| {
            let (_, partners) = state.registry.delete(&id)?;
            let mut changes = vec![Change::TableDeleted { id }];
            changes.extend(state.table_upserts(partners));
            Ok(((), changes))
        })
        .await?;
        self.notify.remove(&id);
        info!(tenant = %self.tenant(), table = %id, "table deleted");
        Ok(())
    }

    /// Merge tables into one seating unit. Either every listed table joins
    /// or none does.
    pub async fn combine_tables(&self, ids: &[TableId]) -> Result<Vec<Table>, EngineError> {
        let set = table_set(ids)?;
        let tables = self
            .mutate("combine_tables", |state| {
                let affected = state.registry.combine(&set)?;
                let changes = state.table_upserts(affected.iter().copied());
                Ok((state.tables_by_id(&affected), changes))
            })
            .await?;
        info!(tenant = %self.tenant(), tables = tables.len(), "tables combined");
        Ok(tables)
    }

    /// Split tables out of their combination. Returns every table whose
    /// record changed, partners included.
    pub async fn separate_tables(&self, ids: &[TableId]) -> Result<Vec<Table>, EngineError> {
        let set = table_set(ids)?;
        let tables = self
            .mutate("separate_tables", |state| {
                let affected = state.registry.separate(&set)?;
                let changes = state.table_upserts(affected.iter().copied());
                Ok((state.tables_by_id(&affected), changes))
            })
            .await?;
        if !tables.is_empty() {
            info!(tenant = %self.tenant(), tables = tables.len(), "tables separated");
        }
        Ok(tables)
    }

    /// Set a table's status. Combined partners follow.
    pub async fn set_table_status(&self, id: TableId, status: TableStatus) -> Result<Vec<Table>, EngineError> {
        self.mutate("set_table_status", |state| {
            let changed = state.registry.set_status(&id, status)?;
            let changes = state.table_upserts(changed.iter().copied());
            Ok((state.tables_by_id(&changed), changes))
        })
        .await
    }

    // ── Orders ───────────────────────────────────────────────

    pub async fn open_order(&self, table: TableId, order: OrderId) -> Result<Vec<Table>, EngineError> {
        let tables = self
            .mutate("open_order", |state| {
                let group = state.registry.open_order(&table, order)?;
                let changes = state.table_upserts(group.iter().copied());
                Ok((state.tables_by_id(&group), changes))
            })
            .await?;
        info!(tenant = %self.tenant(), table = %table, order = %order, "order opened");
        Ok(tables)
    }

    /// Detach the table's order. Returns the closed order id, or `None` when
    /// the table had none.
    pub async fn close_order(&self, table: TableId) -> Result<Option<OrderId>, EngineError> {
        let closed = self
            .mutate("close_order", |state| match state.registry.close_order(&table)? {
                Some((order, group)) => Ok((Some(order), state.table_upserts(group))),
                None => Ok((None, Vec::new())),
            })
            .await?;
        if let Some(order) = closed {
            info!(tenant = %self.tenant(), table = %table, order = %order, "order closed");
        }
        Ok(closed)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book tables for a party. Fails with `Conflict` if any requested table
    /// is held by an active reservation whose slot overlaps.
    pub async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        validate_request(&request)?;
        let reservation = self
            .mutate("create_reservation", |state| {
                if state.reservations.len() >= MAX_RESERVATIONS_PER_TENANT {
                    return Err(EngineError::LimitExceeded("too many reservations"));
                }
                if state.reservations.contains_key(&request.id) {
                    return Err(EngineError::AlreadyExists(request.id));
                }
                state.require_tables(&request.table_ids)?;
                state.check_conflicts(&request.slot(), &request.table_ids, None)?;

                let reservation = request.into_reservation();
                let assigned = state.registry.assign_reservation(reservation.id, &reservation.table_ids);
                state.reservations.insert(reservation.id, reservation.clone());

                let mut changes = vec![Change::ReservationUpserted(reservation.clone())];
                changes.extend(state.table_upserts(assigned));
                Ok((reservation, changes))
            })
            .await?;
        info!(
            tenant = %self.tenant(),
            reservation = %reservation.id,
            date = %reservation.date,
            time = %reservation.time,
            party = reservation.party_size,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Move a reservation through its lifecycle. Setting the current status
    /// again is a no-op.
    pub async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let (reservation, from) = self
            .mutate("update_reservation_status", |state| {
                let current = state.reservation(&id)?.clone();
                let from = current.status;
                if from == status {
                    return Ok(((current, from), Vec::new()));
                }
                if !from.can_become(status) {
                    return Err(ValidationError::InvalidTransition { from, to: status }.into());
                }

                let mut touched = match status {
                    ReservationStatus::Seated => state.registry.seat_reservation(id, &current.table_ids)?,
                    s if s.is_terminal() => {
                        state
                            .registry
                            .release_reservation(id, s == ReservationStatus::Completed)
                    }
                    _ => Vec::new(),
                };

                let mut updated = current;
                updated.status = status;
                state.reservations.insert(id, updated.clone());
                if status.is_terminal() {
                    let released = updated.table_ids.clone();
                    touched.extend(state.reassign_holds(&released));
                }

                let mut changes = vec![Change::ReservationUpserted(updated.clone())];
                changes.extend(state.table_upserts(touched));
                Ok(((updated, from), changes))
            })
            .await?;
        if from != status {
            info!(tenant = %self.tenant(), reservation = %id, %from, to = %status, "reservation status changed");
        }
        Ok(reservation)
    }

    /// Move a pending or confirmed reservation to a new slot and, optionally,
    /// new tables. The reservation's own current slot never conflicts with
    /// itself.
    pub async fn reschedule_reservation(
        &self,
        id: ReservationId,
        date: NaiveDate,
        time: NaiveTime,
        duration_hours: f64,
        table_ids: Option<Vec<TableId>>,
    ) -> Result<Reservation, EngineError> {
        validate_duration(duration_hours)?;
        if let Some(ref ids) = table_ids {
            if ids.is_empty() {
                return Err(ValidationError::NoTables.into());
            }
            table_set(ids)?;
        }

        let reservation = self
            .mutate("reschedule_reservation", |state| {
                let current = state.reservation(&id)?.clone();
                if !matches!(current.status, ReservationStatus::Pending | ReservationStatus::Confirmed) {
                    return Err(EngineError::NotReschedulable(current.status));
                }
                let table_ids = table_ids.unwrap_or_else(|| current.table_ids.clone());
                state.require_tables(&table_ids)?;
                let slot = Slot::starting_at(date, time, duration_hours);
                state.check_conflicts(&slot, &table_ids, Some(id))?;

                let previous = current.table_ids.clone();
                let mut touched = state.registry.release_reservation(id, false);
                touched.extend(state.registry.assign_reservation(id, &table_ids));

                let mut updated = current;
                updated.date = date;
                updated.time = time;
                updated.duration_hours = duration_hours;
                updated.table_ids = table_ids;
                state.reservations.insert(id, updated.clone());
                touched.extend(state.reassign_holds(&previous));

                let mut changes = vec![Change::ReservationUpserted(updated.clone())];
                changes.extend(state.table_upserts(touched));
                Ok((updated, changes))
            })
            .await?;
        info!(
            tenant = %self.tenant(),
            reservation = %id,
            date = %reservation.date,
            time = %reservation.time,
            "reservation rescheduled"
        );
        Ok(reservation)
    }
}
