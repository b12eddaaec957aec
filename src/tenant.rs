use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use tracing::info;

use crate::config::Config;
use crate::engine::{Cafe, EngineError};
use crate::journal::{self, tenant_file_stem, JournalStore};
use crate::limits::*;
use crate::store::{MemoryStore, RecordStore};

/// Per-tenant engines over one shared record store. A tenant's `Cafe` is
/// loaded from the store the first time it is asked for.
pub struct TenantManager {
    cafes: DashMap<String, Arc<Cafe>>,
    store: Arc<dyn RecordStore>,
}

impl TenantManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            cafes: DashMap::new(),
            store,
        }
    }

    /// Journal-backed when `data_dir` is set, memory otherwise. Spawns the
    /// compactor for the journal store, so call from inside a runtime.
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let store: Arc<dyn RecordStore> = match config.data_dir {
            Some(ref dir) => {
                let journals = Arc::new(JournalStore::open(dir.clone(), config.compact_threshold)?);
                tokio::spawn(journal::run_compactor(journals.clone(), config.compact_interval));
                info!(data_dir = %dir.display(), "journal store opened");
                journals
            }
            None => {
                info!("memory store in use, nothing will survive a restart");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(store))
    }

    /// Get or lazily load the engine for the given tenant.
    pub async fn get_or_create(&self, tenant: &str) -> Result<Arc<Cafe>, EngineError> {
        if let Some(cafe) = self.cafes.get(tenant) {
            return Ok(cafe.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(EngineError::LimitExceeded("tenant name too long"));
        }
        if tenant_file_stem(tenant).is_none() {
            return Err(EngineError::LimitExceeded("tenant name must be [A-Za-z0-9_-]+"));
        }
        if self.cafes.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many tenants"));
        }

        let loaded = Arc::new(Cafe::load(tenant, self.store.clone()).await?);
        // Two callers may race to load the same tenant; the first insert wins.
        let cafe = self
            .cafes
            .entry(tenant.to_string())
            .or_insert(loaded)
            .value()
            .clone();
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.cafes.len() as f64);
        Ok(cafe)
    }

    /// Load several tenants concurrently, e.g. at startup.
    pub async fn preload(&self, tenants: &[&str]) -> Result<Vec<Arc<Cafe>>, EngineError> {
        try_join_all(tenants.iter().map(|t| self.get_or_create(t))).await
    }

    pub fn loaded(&self) -> usize {
        self.cafes.len()
    }
}
