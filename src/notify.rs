use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Change, TableId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed changes, one per tenant.
///
/// Subscribers either follow a single table or the whole tenant. Only
/// changes that reached the record store are ever sent.
pub struct NotifyHub {
    channels: DashMap<TableId, broadcast::Sender<Change>>,
    all: broadcast::Sender<Change>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to changes touching one table. Creates the channel if needed.
    pub fn subscribe(&self, table: TableId) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(table)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every change in the tenant.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Change> {
        self.all.subscribe()
    }

    /// Send a change to the tenant feed and to every table it touches.
    /// No-op for tables nobody is listening to.
    pub fn send(&self, change: &Change) {
        let _ = self.all.send(change.clone());
        for table in change.table_ids() {
            if let Some(sender) = self.channels.get(&table) {
                let _ = sender.send(change.clone());
            }
        }
    }

    /// Drop a table's channel (after the table is deleted).
    pub fn remove(&self, table: &TableId) {
        self.channels.remove(table);
    }
}
