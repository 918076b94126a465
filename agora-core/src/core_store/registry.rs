/*
    registry.rs - process-wide list of persisted data hosts

    Every store registers here at startup. A single load-all pass runs before the
    node accepts inbound messages; the ready flag flips once every host has been
    read. At shutdown the same list is flushed.
*/

use super::errors::{handle_poison, StoreResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

/// A store that can be loaded from and flushed to disk
#[async_trait]
pub trait PersistedDataHost: Send + Sync {
    fn name(&self) -> &str;

    /// Load persisted state, returning the number of live items
    fn read_persisted(&self) -> StoreResult<usize>;

    /// Wait until every queued mutation is written
    async fn flush(&self) -> StoreResult<()>;
}

pub struct StoreRegistry {
    hosts: Mutex<Vec<Arc<dyn PersistedDataHost>>>,
    ready_tx: watch::Sender<bool>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self { hosts: Mutex::new(Vec::new()), ready_tx }
    }

    pub fn register(&self, host: Arc<dyn PersistedDataHost>) -> StoreResult<()> {
        let mut hosts = self.hosts.lock().map_err(handle_poison)?;
        hosts.push(host);
        Ok(())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.hosts.lock().map_err(handle_poison)?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn snapshot(&self) -> StoreResult<Vec<Arc<dyn PersistedDataHost>>> {
        Ok(self.hosts.lock().map_err(handle_poison)?.clone())
    }

    /// Load every registered host, then signal ready.
    ///
    /// Stops at the first host that fails; the ready flag stays down in that case.
    pub fn read_all_persisted(&self) -> StoreResult<usize> {
        let mut total = 0;
        for host in self.snapshot()? {
            total += host.read_persisted()?;
        }

        self.ready_tx.send_replace(true);
        info!(total, "All persisted data loaded");
        Ok(total)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Receiver that observes the ready flag
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Flush every host; keeps going past failures and returns the first one
    pub async fn flush_all(&self) -> StoreResult<()> {
        let mut first_error = None;
        for host in self.snapshot()? {
            if let Err(e) = host.flush().await {
                warn!(store = host.name(), error = %e, "Flush failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
