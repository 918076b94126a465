/*
    HistoricalStoreService - append-only store of persistable payloads for one kind

    Payloads are content addressed and never change once written, so the store
    persists full snapshots rather than deltas. Live payloads can be frozen into a
    named release bucket; peers syncing from an older release then only need the
    keys added since that release.
*/

use super::errors::{handle_poison, StoreError, StoreResult};
use super::persistence::{PersistableState, PersistenceHandle, PersistenceManager, PersistenceOptions};
use super::registry::PersistedDataHost;
use crate::core_payload::{PersistableKind, PersistablePayload, StorageKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{OnceLock, RwLock};
use tracing::info;

/// Payloads frozen at a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBucket {
    pub release: String,
    pub payloads: BTreeMap<StorageKey, PersistablePayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStoreState {
    pub live: BTreeMap<StorageKey, PersistablePayload>,
    /// Frozen buckets, oldest release first
    pub buckets: Vec<HistoricalBucket>,
}

impl HistoricalStoreState {
    fn get(&self, key: &StorageKey) -> Option<&PersistablePayload> {
        self.live
            .get(key)
            .or_else(|| self.buckets.iter().find_map(|bucket| bucket.payloads.get(key)))
    }

    fn len(&self) -> usize {
        self.live.len() + self.buckets.iter().map(|b| b.payloads.len()).sum::<usize>()
    }
}

#[derive(Debug, Clone)]
pub enum HistoricalMutation {
    Put(StorageKey, PersistablePayload),
    Remove(StorageKey),
    Freeze(String),
}

impl PersistableState for HistoricalStoreState {
    type Mutation = HistoricalMutation;

    fn apply(&mut self, mutation: HistoricalMutation) {
        match mutation {
            HistoricalMutation::Put(key, payload) => {
                self.live.insert(key, payload);
            }
            HistoricalMutation::Remove(key) => {
                self.live.remove(&key);
                for bucket in &mut self.buckets {
                    bucket.payloads.remove(&key);
                }
            }
            HistoricalMutation::Freeze(release) => {
                let payloads = std::mem::take(&mut self.live);
                self.buckets.push(HistoricalBucket { release, payloads });
            }
        }
    }
}

pub struct HistoricalStoreService {
    kind: PersistableKind,
    state: RwLock<HistoricalStoreState>,
    persistence: Option<PersistenceManager<HistoricalStoreState>>,
    writer: OnceLock<PersistenceHandle<HistoricalMutation>>,
}

impl HistoricalStoreService {
    pub fn new(kind: PersistableKind, dir: &Path, options: PersistenceOptions) -> Self {
        Self {
            persistence: Some(PersistenceManager::new(dir, kind.as_str(), options)),
            ..Self::in_memory(kind)
        }
    }

    pub fn in_memory(kind: PersistableKind) -> Self {
        Self {
            kind,
            state: RwLock::new(HistoricalStoreState::default()),
            persistence: None,
            writer: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> PersistableKind {
        self.kind
    }

    pub fn can_handle(&self, payload: &PersistablePayload) -> bool {
        payload.kind() == self.kind
    }

    pub fn get(&self, key: &StorageKey) -> StoreResult<Option<PersistablePayload>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.get(key).cloned())
    }

    pub fn contains_key(&self, key: &StorageKey) -> StoreResult<bool> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.get(key).is_some())
    }

    pub fn len(&self) -> StoreResult<usize> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every payload, frozen buckets first
    pub fn payloads(&self) -> StoreResult<Vec<(StorageKey, PersistablePayload)>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state
            .buckets
            .iter()
            .flat_map(|bucket| bucket.payloads.iter())
            .chain(state.live.iter())
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    /// Insert unless the key is already known; returns whether it was inserted
    pub fn put_if_absent(&self, key: StorageKey, payload: PersistablePayload) -> StoreResult<bool> {
        let mut state = self.state.write().map_err(handle_poison)?;
        if state.get(&key).is_some() {
            return Ok(false);
        }
        self.apply(&mut state, HistoricalMutation::Put(key, payload));
        Ok(true)
    }

    pub fn remove(&self, key: &StorageKey) -> StoreResult<bool> {
        let mut state = self.state.write().map_err(handle_poison)?;
        if state.get(key).is_none() {
            return Ok(false);
        }
        self.apply(&mut state, HistoricalMutation::Remove(*key));
        Ok(true)
    }

    /// Move all live payloads into a bucket named `release`
    pub fn freeze(&self, release: &str) -> StoreResult<usize> {
        let mut state = self.state.write().map_err(handle_poison)?;
        if state.buckets.iter().any(|bucket| bucket.release == release) {
            return Err(StoreError::Internal(format!(
                "{} release {} already frozen",
                self.kind, release
            )));
        }
        let moved = state.live.len();
        self.apply(&mut state, HistoricalMutation::Freeze(release.to_string()));
        Ok(moved)
    }

    /// Keys added after `release` was frozen; all keys if the release is unknown
    pub fn keys_since(&self, release: &str) -> StoreResult<Vec<StorageKey>> {
        let state = self.state.read().map_err(handle_poison)?;
        let start = state
            .buckets
            .iter()
            .position(|bucket| bucket.release == release)
            .map(|idx| idx + 1)
            .unwrap_or(0);

        Ok(state.buckets[start..]
            .iter()
            .flat_map(|bucket| bucket.payloads.keys())
            .chain(state.live.keys())
            .copied()
            .collect())
    }

    fn apply(&self, state: &mut HistoricalStoreState, mutation: HistoricalMutation) {
        if let Some(writer) = self.writer.get() {
            writer.send(mutation.clone());
        }
        state.apply(mutation);
    }
}

#[async_trait]
impl PersistedDataHost for HistoricalStoreService {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn read_persisted(&self) -> StoreResult<usize> {
        let Some(persistence) = &self.persistence else {
            return self.len();
        };
        if self.writer.get().is_some() {
            return Err(StoreError::Internal(format!("{} store already loaded", self.kind)));
        }

        let loaded = persistence.read_persisted()?.unwrap_or_default();
        let handle = persistence.spawn_writer(loaded.clone())?;
        let count = loaded.len();

        *self.state.write().map_err(handle_poison)? = loaded;
        self.writer
            .set(handle)
            .map_err(|_| StoreError::Internal(format!("{} store loaded concurrently", self.kind)))?;

        info!(store = %self.kind, payloads = count, "Historical store loaded");
        Ok(count)
    }

    async fn flush(&self) -> StoreResult<()> {
        match self.writer.get() {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }
}
