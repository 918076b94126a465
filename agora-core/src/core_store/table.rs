//! Fixed per-kind store table
//!
//! One store per payload kind, built once at startup and indexed by the kind tag.

use super::historical_store::HistoricalStoreService;
use super::map_store::{MapStoreOptions, MapStoreService};
use super::persistence::PersistenceOptions;
use super::registry::{PersistedDataHost, StoreRegistry};
use super::errors::StoreResult;
use crate::core_payload::{PersistableKind, ProtectedKind};
use crate::core_storage::clock::Clock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct StoreTable {
    protected: [Arc<MapStoreService>; 3],
    persistable: [Arc<HistoricalStoreService>; 3],
}

impl StoreTable {
    /// Disk-backed stores under `dir`; `ttl_of` picks each protected kind's TTL
    pub fn persistent(
        dir: &Path,
        ttl_of: impl Fn(ProtectedKind) -> Duration,
        sequence_purge_age: Duration,
        persistence: PersistenceOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let options = |kind| MapStoreOptions {
            ttl: ttl_of(kind),
            sequence_purge_age,
            persistence: persistence.clone(),
        };
        Self {
            protected: ProtectedKind::ALL
                .map(|kind| Arc::new(MapStoreService::new(kind, dir, options(kind), clock.clone()))),
            persistable: PersistableKind::ALL
                .map(|kind| Arc::new(HistoricalStoreService::new(kind, dir, persistence.clone()))),
        }
    }

    /// Memory-only stores, mostly for tests and benches
    pub fn in_memory(
        ttl_of: impl Fn(ProtectedKind) -> Duration,
        sequence_purge_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            protected: ProtectedKind::ALL.map(|kind| {
                let options = MapStoreOptions {
                    ttl: ttl_of(kind),
                    sequence_purge_age,
                    persistence: PersistenceOptions::default(),
                };
                Arc::new(MapStoreService::in_memory(kind, options, clock.clone()))
            }),
            persistable: PersistableKind::ALL.map(|kind| Arc::new(HistoricalStoreService::in_memory(kind))),
        }
    }

    pub fn protected(&self, kind: ProtectedKind) -> &Arc<MapStoreService> {
        &self.protected[kind.index()]
    }

    pub fn persistable(&self, kind: PersistableKind) -> &Arc<HistoricalStoreService> {
        &self.persistable[kind.index()]
    }

    pub fn protected_stores(&self) -> impl Iterator<Item = &Arc<MapStoreService>> {
        self.protected.iter()
    }

    pub fn persistable_stores(&self) -> impl Iterator<Item = &Arc<HistoricalStoreService>> {
        self.persistable.iter()
    }

    /// Register every store as a persisted data host
    pub fn register_all(&self, registry: &StoreRegistry) -> StoreResult<()> {
        for store in &self.protected {
            registry.register(store.clone() as Arc<dyn PersistedDataHost>)?;
        }
        for store in &self.persistable {
            registry.register(store.clone() as Arc<dyn PersistedDataHost>)?;
        }
        Ok(())
    }
}
