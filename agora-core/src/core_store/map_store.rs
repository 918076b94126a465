/*
    MapStoreService - persisted map of protected entries for one payload kind

    Responsibilities:
    - hold the key -> entry map of one protected kind behind its own RwLock
    - remember the last sequence number seen per key, even after removal
    - remember removed keys of add-once kinds
    - mirror every change into the store's persistence writer

    The storage engine does all validation; this type only offers atomic
    check-then-apply through [`MapStoreService::write`].
*/

use super::errors::{handle_poison, StoreError, StoreResult};
use super::persistence::{PersistableState, PersistenceHandle, PersistenceManager, PersistenceOptions};
use super::registry::PersistedDataHost;
use crate::core_payload::{ProtectedKind, ProtectedPayload, StorageEntry, StorageKey};
use crate::core_storage::clock::Clock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tracing::info;

/// Last sequence number seen for a key and when we saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub sequence_number: u64,
    pub recorded_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapStoreState {
    pub entries: BTreeMap<StorageKey, StorageEntry>,
    pub sequence_numbers: BTreeMap<StorageKey, SequenceRecord>,
    pub removed_add_once: BTreeSet<StorageKey>,
}

#[derive(Debug, Clone)]
pub enum MapStoreMutation {
    PutEntry(StorageKey, StorageEntry),
    RemoveEntry(StorageKey),
    RecordSequence(StorageKey, SequenceRecord),
    ForgetSequence(StorageKey),
    MarkRemoved(StorageKey),
}

impl PersistableState for MapStoreState {
    type Mutation = MapStoreMutation;

    fn apply(&mut self, mutation: MapStoreMutation) {
        match mutation {
            MapStoreMutation::PutEntry(key, entry) => {
                self.entries.insert(key, entry);
            }
            MapStoreMutation::RemoveEntry(key) => {
                self.entries.remove(&key);
            }
            MapStoreMutation::RecordSequence(key, record) => {
                self.sequence_numbers.insert(key, record);
            }
            MapStoreMutation::ForgetSequence(key) => {
                self.sequence_numbers.remove(&key);
            }
            MapStoreMutation::MarkRemoved(key) => {
                self.removed_add_once.insert(key);
            }
        }
    }
}

/// Settings shared by all map stores
#[derive(Debug, Clone)]
pub struct MapStoreOptions {
    pub ttl: Duration,
    /// Sequence records older than this are dropped on load
    pub sequence_purge_age: Duration,
    pub persistence: PersistenceOptions,
}

pub struct MapStoreService {
    kind: ProtectedKind,
    ttl: Duration,
    sequence_purge_age: Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<MapStoreState>,
    persistence: Option<PersistenceManager<MapStoreState>>,
    writer: OnceLock<PersistenceHandle<MapStoreMutation>>,
}

impl MapStoreService {
    /// Store persisted under `dir/<kind>.store`
    pub fn new(kind: ProtectedKind, dir: &Path, options: MapStoreOptions, clock: Arc<dyn Clock>) -> Self {
        let persistence = PersistenceManager::new(dir, kind.as_str(), options.persistence.clone());
        Self {
            persistence: Some(persistence),
            ..Self::in_memory(kind, options, clock)
        }
    }

    /// Store that never touches disk
    pub fn in_memory(kind: ProtectedKind, options: MapStoreOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            ttl: options.ttl,
            sequence_purge_age: options.sequence_purge_age,
            clock,
            state: RwLock::new(MapStoreState::default()),
            persistence: None,
            writer: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> ProtectedKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn can_handle(&self, payload: &ProtectedPayload) -> bool {
        payload.kind() == self.kind
    }

    pub fn get(&self, key: &StorageKey) -> StoreResult<Option<StorageEntry>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.entries.get(key).cloned())
    }

    pub fn contains_key(&self, key: &StorageKey) -> StoreResult<bool> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.entries.contains_key(key))
    }

    pub fn sequence_record(&self, key: &StorageKey) -> StoreResult<Option<SequenceRecord>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.sequence_numbers.get(key).copied())
    }

    pub fn len(&self) -> StoreResult<usize> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of all live entries
    pub fn entries(&self) -> StoreResult<Vec<(StorageKey, StorageEntry)>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.entries.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// Exclusive access for a check-then-apply sequence
    pub fn write(&self) -> StoreResult<MapStoreWriter<'_>> {
        let guard = self.state.write().map_err(handle_poison)?;
        Ok(MapStoreWriter { guard, writer: self.writer.get() })
    }

    /// Remove every entry older than the TTL. Sequence records are kept.
    pub fn remove_expired(&self, now: u64) -> StoreResult<Vec<(StorageKey, StorageEntry)>> {
        let mut txn = self.write()?;
        let expired: Vec<(StorageKey, StorageEntry)> = txn
            .state()
            .entries
            .iter()
            .filter(|(_, entry)| entry.protected_entry().is_expired_after(now, self.ttl))
            .map(|(k, v)| (*k, v.clone()))
            .collect();

        for (key, _) in &expired {
            txn.apply(MapStoreMutation::RemoveEntry(*key));
        }
        Ok(expired)
    }

    fn prune_on_load(&self, state: &MapStoreState, now: u64) -> Vec<MapStoreMutation> {
        let purge_age = self.sequence_purge_age.as_millis() as u64;
        let expired: BTreeSet<StorageKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.protected_entry().is_expired_after(now, self.ttl))
            .map(|(key, _)| *key)
            .collect();

        let mut mutations: Vec<MapStoreMutation> =
            expired.iter().map(|key| MapStoreMutation::RemoveEntry(*key)).collect();
        for (key, record) in &state.sequence_numbers {
            let live = state.entries.contains_key(key) && !expired.contains(key);
            if !live && now.saturating_sub(record.recorded_at) > purge_age {
                mutations.push(MapStoreMutation::ForgetSequence(*key));
            }
        }
        mutations
    }
}

#[async_trait]
impl PersistedDataHost for MapStoreService {
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
        let pruning = self.prune_on_load(&loaded, self.clock.now_millis());
        let handle = persistence.spawn_writer(loaded.clone())?;

        let mut state = self.state.write().map_err(handle_poison)?;
        *state = loaded;
        for mutation in &pruning {
            state.apply(mutation.clone());
            handle.send(mutation.clone());
        }
        let count = state.entries.len();
        drop(state);

        self.writer
            .set(handle)
            .map_err(|_| StoreError::Internal(format!("{} store loaded concurrently", self.kind)))?;

        info!(store = %self.kind, entries = count, pruned = pruning.len(), "Map store loaded");
        Ok(count)
    }

    async fn flush(&self) -> StoreResult<()> {
        match self.writer.get() {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }
}

/// Write guard over one map store; every change is mirrored to the writer task
pub struct MapStoreWriter<'a> {
    guard: RwLockWriteGuard<'a, MapStoreState>,
    writer: Option<&'a PersistenceHandle<MapStoreMutation>>,
}

impl MapStoreWriter<'_> {
    pub fn state(&self) -> &MapStoreState {
        &self.guard
    }

    pub fn entry(&self, key: &StorageKey) -> Option<&StorageEntry> {
        self.guard.entries.get(key)
    }

    pub fn sequence_record(&self, key: &StorageKey) -> Option<SequenceRecord> {
        self.guard.sequence_numbers.get(key).copied()
    }

    pub fn is_removed(&self, key: &StorageKey) -> bool {
        self.guard.removed_add_once.contains(key)
    }

    pub fn apply(&mut self, mutation: MapStoreMutation) {
        if let Some(writer) = self.writer {
            writer.send(mutation.clone());
        }
        self.guard.apply(mutation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_payload::{Keypair, OfferDirection, OfferPayload, ProtectedStorageEntry};
    use crate::core_storage::clock::ManualClock;
    use tempfile::tempdir;

    const DAY: u64 = 24 * 3600 * 1000;

    fn options() -> MapStoreOptions {
        MapStoreOptions {
            ttl: Duration::from_secs(60),
            sequence_purge_age: Duration::from_millis(10 * DAY),
            persistence: PersistenceOptions::default(),
        }
    }

    fn entry(id: &str, seq: u64, now: u64) -> (StorageKey, StorageEntry) {
        let owner = Keypair::from_seed([5u8; 32]);
        let payload = ProtectedPayload::Offer(OfferPayload {
            id: id.to_string(),
            owner_pub_key: owner.public_key(),
            direction: OfferDirection::Sell,
            currency_code: "USD".to_string(),
            price: 1,
            amount: 1,
            min_amount: 1,
            payment_method: "CASH".to_string(),
            date: 0,
        });
        let entry: StorageEntry = ProtectedStorageEntry::sign(payload, seq, &owner, now).unwrap().into();
        (entry.key().unwrap(), entry)
    }

    fn record(seq: u64, at: u64) -> SequenceRecord {
        SequenceRecord { sequence_number: seq, recorded_at: at }
    }

    #[test]
    fn test_write_guard_applies_mutations() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MapStoreService::in_memory(ProtectedKind::Offer, options(), clock);
        let (key, entry) = entry("a", 1, 0);

        {
            let mut txn = store.write().unwrap();
            txn.apply(MapStoreMutation::PutEntry(key, entry.clone()));
            txn.apply(MapStoreMutation::RecordSequence(key, record(1, 0)));
        }

        assert_eq!(store.get(&key).unwrap(), Some(entry));
        assert_eq!(store.sequence_record(&key).unwrap(), Some(record(1, 0)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_remove_expired_keeps_sequence_records() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MapStoreService::in_memory(ProtectedKind::Offer, options(), clock);
        let (old_key, old) = entry("old", 1, 0);
        let (new_key, new) = entry("new", 1, 50_000);

        {
            let mut txn = store.write().unwrap();
            txn.apply(MapStoreMutation::PutEntry(old_key, old));
            txn.apply(MapStoreMutation::RecordSequence(old_key, record(1, 0)));
            txn.apply(MapStoreMutation::PutEntry(new_key, new));
        }

        let expired = store.remove_expired(60_001).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, old_key);
        assert!(!store.contains_key(&old_key).unwrap());
        assert!(store.contains_key(&new_key).unwrap());
        assert!(store.sequence_record(&old_key).unwrap().is_some());
    }

    #[test]
    fn test_can_handle_only_its_kind() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MapStoreService::in_memory(ProtectedKind::DisputeAgent, options(), clock);
        let (_, offer) = entry("a", 1, 0);

        assert!(!store.can_handle(&offer.protected_entry().payload));
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let (key, entry) = entry("persisted", 3, 1_000);

        let store = MapStoreService::new(ProtectedKind::Offer, dir.path(), options(), clock.clone());
        assert_eq!(store.read_persisted().unwrap(), 0);
        {
            let mut txn = store.write().unwrap();
            txn.apply(MapStoreMutation::PutEntry(key, entry.clone()));
            txn.apply(MapStoreMutation::RecordSequence(key, record(3, 1_000)));
        }
        store.flush().await.unwrap();

        let reloaded = MapStoreService::new(ProtectedKind::Offer, dir.path(), options(), clock);
        assert_eq!(reloaded.read_persisted().unwrap(), 1);
        assert_eq!(reloaded.get(&key).unwrap(), Some(entry));
        assert_eq!(reloaded.sequence_record(&key).unwrap(), Some(record(3, 1_000)));
    }

    #[tokio::test]
    async fn test_load_drops_expired_and_purges_old_records() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let (expired_key, expired) = entry("expired", 1, 0);
        let stale_key = StorageKey::hash(b"long gone");

        let store = MapStoreService::new(ProtectedKind::Offer, dir.path(), options(), clock.clone());
        store.read_persisted().unwrap();
        {
            let mut txn = store.write().unwrap();
            txn.apply(MapStoreMutation::PutEntry(expired_key, expired));
            txn.apply(MapStoreMutation::RecordSequence(expired_key, record(1, 0)));
            txn.apply(MapStoreMutation::RecordSequence(stale_key, record(9, 0)));
        }
        store.flush().await.unwrap();

        clock.set(11 * DAY);
        let reloaded = MapStoreService::new(ProtectedKind::Offer, dir.path(), options(), clock);
        assert_eq!(reloaded.read_persisted().unwrap(), 0);
        assert!(reloaded.sequence_record(&stale_key).unwrap().is_none());
        assert!(reloaded.sequence_record(&expired_key).unwrap().is_none());

        // pruning is persisted as well
        reloaded.flush().await.unwrap();
        let manager: PersistenceManager<MapStoreState> =
            PersistenceManager::new(dir.path(), "offer", PersistenceOptions::default());
        let on_disk = manager.read_persisted().unwrap().unwrap();
        assert!(on_disk.entries.is_empty());
        assert!(on_disk.sequence_numbers.is_empty());
    }

    #[tokio::test]
    async fn test_double_load_is_rejected() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let store = MapStoreService::new(ProtectedKind::Mailbox, dir.path(), options(), clock);

        store.read_persisted().unwrap();
        assert!(matches!(store.read_persisted(), Err(StoreError::Internal(_))));
    }
}
