use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The external record store, scoped by tenant.
///
/// The engine reads a tenant's records once when the tenant is loaded and
/// afterwards only writes. `apply` is how the engine commits a multi-record
/// change; adapters that can commit atomically should override it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_tables(&self, tenant: &str) -> Result<Vec<Table>, StoreError>;

    async fn list_reservations(&self, tenant: &str) -> Result<Vec<Reservation>, StoreError>;

    async fn upsert_table(&self, tenant: &str, table: Table) -> Result<(), StoreError>;

    async fn upsert_reservation(&self, tenant: &str, reservation: Reservation) -> Result<(), StoreError>;

    async fn delete_table(&self, tenant: &str, id: TableId) -> Result<(), StoreError>;

    async fn apply(&self, tenant: &str, changes: &[Change]) -> Result<(), StoreError> {
        for change in changes {
            match change {
                Change::TableUpserted(t) => self.upsert_table(tenant, t.clone()).await?,
                Change::TableDeleted { id } => self.delete_table(tenant, *id).await?,
                Change::ReservationUpserted(r) => self.upsert_reservation(tenant, r.clone()).await?,
            }
        }
        Ok(())
    }
}

/// One tenant's records, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct TenantRecords {
    pub tables: BTreeMap<TableId, Table>,
    pub reservations: BTreeMap<ReservationId, Reservation>,
}

impl TenantRecords {
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::TableUpserted(t) => {
                self.tables.insert(t.id, t.clone());
            }
            Change::TableDeleted { id } => {
                self.tables.remove(id);
            }
            Change::ReservationUpserted(r) => {
                self.reservations.insert(r.id, r.clone());
            }
        }
    }

    /// The smallest change list that recreates these records.
    pub fn snapshot(&self) -> Vec<Change> {
        self.tables
            .values()
            .cloned()
            .map(Change::TableUpserted)
            .chain(self.reservations.values().cloned().map(Change::ReservationUpserted))
            .collect()
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tenants: DashMap<String, TenantRecords>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_tables(&self, tenant: &str) -> Result<Vec<Table>, StoreError> {
        Ok(self
            .tenants
            .get(tenant)
            .map(|r| r.tables.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_reservations(&self, tenant: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .tenants
            .get(tenant)
            .map(|r| r.reservations.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_table(&self, tenant: &str, table: Table) -> Result<(), StoreError> {
        self.tenants
            .entry(tenant.to_string())
            .or_default()
            .apply(&Change::TableUpserted(table));
        Ok(())
    }

    async fn upsert_reservation(&self, tenant: &str, reservation: Reservation) -> Result<(), StoreError> {
        self.tenants
            .entry(tenant.to_string())
            .or_default()
            .apply(&Change::ReservationUpserted(reservation));
        Ok(())
    }

    async fn delete_table(&self, tenant: &str, id: TableId) -> Result<(), StoreError> {
        if let Some(mut records) = self.tenants.get_mut(tenant) {
            records.apply(&Change::TableDeleted { id });
        }
        Ok(())
    }

    /// Applies the whole batch under one shard lock.
    async fn apply(&self, tenant: &str, changes: &[Change]) -> Result<(), StoreError> {
        let mut records = self.tenants.entry(tenant.to_string()).or_default();
        for change in changes {
            records.apply(change);
        }
        Ok(())
    }
}
