use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::broadcast;

use crate::model::*;

use super::availability::AvailabilityResolver;
use super::validate::validate_duration;
use super::{Cafe, CafeState, EngineError};

impl Cafe {
    /// Tables with no active reservation overlapping the requested slot,
    /// in table-id order. Reads one consistent snapshot.
    pub async fn free_tables(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        duration_hours: f64,
    ) -> Result<Vec<Table>, EngineError> {
        validate_duration(duration_hours)?;
        let state = self.state.read().await;
        let tables = state.registry.tables();
        let resolver = AvailabilityResolver::new(&tables, state.reservations.values());
        Ok(resolver.free_tables(date, time, duration_hours))
    }

    /// Free tables that can seat `party_size` on their own.
    pub async fn free_tables_for_party(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        duration_hours: f64,
        party_size: u32,
    ) -> Result<Vec<Table>, EngineError> {
        let mut free = self.free_tables(date, time, duration_hours).await?;
        free.retain(|t| t.capacity >= party_size);
        Ok(free)
    }

    pub async fn eligible_for_combination(&self) -> Vec<Table> {
        self.state.read().await.registry.eligible_for_combination()
    }

    /// Connected combination groups, each ordered by id.
    pub async fn combined_groups(&self) -> Vec<BTreeSet<TableId>> {
        self.state.read().await.registry.combined_groups()
    }

    pub async fn table(&self, id: TableId) -> Option<Table> {
        self.state.read().await.registry.get(&id)
    }

    pub async fn tables(&self) -> Vec<Table> {
        self.state.read().await.registry.tables()
    }

    pub async fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.state.read().await.reservations.get(&id).cloned()
    }

    /// Reservations on `date`, earliest first.
    pub async fn reservations_on(&self, date: NaiveDate) -> Vec<Reservation> {
        let state = self.state.read().await;
        let mut day: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        day.sort_by_key(|r| (r.time, r.id));
        day
    }

    /// Point-in-time copy of the whole tenant.
    pub async fn snapshot(&self) -> CafeState {
        self.state.read().await.clone()
    }

    /// Changes touching one table, starting now.
    pub fn subscribe(&self, table: TableId) -> broadcast::Receiver<Change> {
        self.notify.subscribe(table)
    }

    /// Every change in this tenant, starting now.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Change> {
        self.notify.subscribe_all()
    }
}
