mod availability;
mod combinations;
mod error;
mod mutations;
mod queries;
mod registry;
mod validate;

pub use availability::{free_tables, AvailabilityResolver};
pub use combinations::Combinations;
pub use error::{EngineError, IneligibleReason, RegistryError, ValidationError};
pub use registry::TableRegistry;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::store::RecordStore;

/// Everything one tenant owns: the table registry and the reservation book.
#[derive(Debug, Clone, Default)]
pub struct CafeState {
    pub registry: TableRegistry,
    pub reservations: BTreeMap<ReservationId, Reservation>,
}

impl CafeState {
    /// Upserts for every listed table that still exists.
    fn table_upserts(&self, ids: impl IntoIterator<Item = TableId>) -> Vec<Change> {
        ids.into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.registry.get(&id))
            .map(Change::TableUpserted)
            .collect()
    }

    fn tables_by_id(&self, ids: &[TableId]) -> Vec<Table> {
        ids.iter().filter_map(|id| self.registry.get(id)).collect()
    }
}

/// One tenant's engine.
///
/// All mutations are serialized by a single write lock held across
/// validate → persist → swap → notify, so a multi-table change is never
/// observable half-done. Mutations run against a clone of the state; the
/// clone replaces the live state only after the record store accepted
/// every change.
pub struct Cafe {
    tenant: String,
    state: RwLock<CafeState>,
    store: Arc<dyn RecordStore>,
    pub notify: Arc<NotifyHub>,
}

impl Cafe {
    /// Load a tenant's records from the store.
    pub async fn load(tenant: impl Into<String>, store: Arc<dyn RecordStore>) -> Result<Self, EngineError> {
        let tenant = tenant.into();
        let tables = store.list_tables(&tenant).await?;
        let reservations: BTreeMap<ReservationId, Reservation> = store
            .list_reservations(&tenant)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let registry = TableRegistry::from_records(tables);
        info!(
            tenant = %tenant,
            tables = registry.len(),
            reservations = reservations.len(),
            "tenant loaded"
        );

        Ok(Self {
            tenant,
            state: RwLock::new(CafeState { registry, reservations }),
            store,
            notify: Arc::new(NotifyHub::new()),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Run `f` against a copy of the state, persist the changes it reports,
    /// then make the copy live and notify subscribers.
    async fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut CafeState) -> Result<(T, Vec<Change>), EngineError>,
    ) -> Result<T, EngineError> {
        let started = Instant::now();
        let mut guard = self.state.write().await;
        let mut next = guard.clone();

        let result = match f(&mut next) {
            Ok((value, changes)) => match self.persist(&changes).await {
                Ok(()) => {
                    *guard = next;
                    drop(guard);
                    for change in &changes {
                        self.notify.send(change);
                    }
                    debug!(tenant = %self.tenant, op, changes = changes.len(), "committed");
                    Ok(value)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            debug!(tenant = %self.tenant, op, "rejected: {e}");
        }
        observability::record_operation(op, result.as_ref().err(), started.elapsed());
        result
    }

    async fn persist(&self, changes: &[Change]) -> Result<(), EngineError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.store.apply(&self.tenant, changes).await?;
        Ok(())
    }
}
