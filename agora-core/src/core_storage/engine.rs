/*
    DataStorage - validation and application of replicated store operations

    Responsibilities:
    `engine.rs` is the single entry point for every mutation of the replicated
    store. It validates entries (structure, ownership, signature, sequence
    number, TTL), applies accepted ones to the per-kind map stores and reports
    what changed so the gossip layer can rebroadcast.

    Inputs:
    - protected storage entries (add / remove)
    - refresh records
    - persistable payloads

    Outputs:
    - typed outcomes or rejection reasons
    - StorageEvent notifications for local consumers
    - counters in StorageStats and the metrics facade

    Notes:
    - last-writer-wins by sequence number only, never by timestamp
    - each kind has its own lock; nothing here holds two store locks at once
*/

use super::clock::Clock;
use super::error::{RejectReason, StorageError, StorageResult};
use crate::core_payload::{
    PersistableKind, PersistablePayload, ProtectedKind, RefreshOfferMessage, StorageEntry,
    StorageKey,
};
use crate::core_store::{MapStoreMutation, MapStoreService, SequenceRecord, StoreTable};
use crate::metrics::{record_counter, StatsSnapshot, StorageStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-node validation limits
#[derive(Debug, Clone)]
pub struct StorageLimits {
    /// Maximum encoded payload size in bytes
    pub max_payload_size: usize,
    /// How far in the future a trade statistics date may lie
    pub date_tolerance: Duration,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self { max_payload_size: 20 * 1024, date_tolerance: Duration::from_secs(24 * 3600) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// Same entry at the same sequence number; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistableOutcome {
    Added,
    AlreadyPresent,
}

/// Change notification for local consumers (offer book, mailbox service, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    Added { kind: ProtectedKind, key: StorageKey },
    Removed { kind: ProtectedKind, key: StorageKey },
    Refreshed { kind: ProtectedKind, key: StorageKey },
    Expired { kind: ProtectedKind, key: StorageKey },
    PersistableAdded { kind: PersistableKind, key: StorageKey },
    PersistableRemoved { kind: PersistableKind, key: StorageKey },
}

pub struct DataStorage {
    stores: Arc<StoreTable>,
    clock: Arc<dyn Clock>,
    limits: StorageLimits,
    events: broadcast::Sender<StorageEvent>,
    stats: Arc<StorageStats>,
}

impl DataStorage {
    pub fn new(stores: Arc<StoreTable>, clock: Arc<dyn Clock>, limits: StorageLimits) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { stores, clock, limits, events, stats: Arc::new(StorageStats::new()) }
    }

    pub fn stores(&self) -> &Arc<StoreTable> {
        &self.stores
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn limits(&self) -> &StorageLimits {
        &self.limits
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Add or replace a protected entry
    pub fn add_protected_entry(&self, entry: StorageEntry) -> StorageResult<AddOutcome> {
        let result = self.try_add_protected(entry);
        match &result {
            Ok(AddOutcome::Added) => {
                self.stats.inc_added();
                record_counter("storage.add.accepted", 1);
            }
            Ok(AddOutcome::Duplicate) => {
                self.stats.inc_duplicates();
                record_counter("storage.add.duplicate", 1);
            }
            Err(e) => self.record_failure("add", e),
        }
        result
    }

    /// Remove a protected entry on behalf of its owner (or mailbox receiver)
    pub fn remove_protected_entry(&self, removal: StorageEntry) -> StorageResult<RemoveOutcome> {
        let result = self.try_remove_protected(removal);
        match &result {
            Ok(RemoveOutcome::Removed) => {
                self.stats.inc_removed();
                record_counter("storage.remove.accepted", 1);
            }
            Ok(RemoveOutcome::NotFound) => self.record_unknown_owner("remove"),
            Err(e) => self.record_failure("remove", e),
        }
        result
    }

    /// Bump sequence number and TTL of an entry we already hold
    pub fn refresh_ttl(&self, refresh: &RefreshOfferMessage) -> StorageResult<RefreshOutcome> {
        let result = self.try_refresh(refresh);
        match &result {
            Ok(RefreshOutcome::Refreshed) => {
                self.stats.inc_refreshed();
                record_counter("storage.refresh.accepted", 1);
            }
            Ok(RefreshOutcome::NotFound) => self.record_unknown_owner("refresh"),
            Err(e) => self.record_failure("refresh", e),
        }
        result
    }

    /// Content-addressed insert; `check_date` applies the future-date tolerance
    pub fn add_persistable_payload(
        &self,
        payload: PersistablePayload,
        check_date: bool,
    ) -> StorageResult<PersistableOutcome> {
        let result = self.try_add_persistable(payload, check_date);
        match &result {
            Ok(PersistableOutcome::Added) => {
                self.stats.inc_persistable_added();
                record_counter("storage.persistable.added", 1);
            }
            Ok(PersistableOutcome::AlreadyPresent) => {
                self.stats.inc_persistable_duplicates();
                record_counter("storage.persistable.duplicate", 1);
            }
            Err(e) => self.record_failure("add_persistable", e),
        }
        result
    }

    fn try_add_protected(&self, mut entry: StorageEntry) -> StorageResult<AddOutcome> {
        entry.validate_shape()?;
        entry.protected_entry().payload.validate(self.limits.max_payload_size)?;
        if !entry.add_signer_matches_payload() {
            return Err(RejectReason::OwnerMismatch.into());
        }
        if !entry.protected_entry().verify_signature() {
            return Err(RejectReason::InvalidSignature.into());
        }

        let key = entry.key()?;
        let kind = entry.kind();
        let store = self.stores.protected(kind);
        let now = self.clock.now_millis();
        entry.protected_entry_mut().maybe_adjust_creation_timestamp(now);

        let mut txn = store.write()?;
        if kind.is_add_once() && txn.is_removed(&key) {
            return Err(RejectReason::PreviouslyRemoved.into());
        }
        if entry.protected_entry().is_expired_after(now, store.ttl()) {
            return Err(RejectReason::Expired.into());
        }
        if let Some(stored) = txn.entry(&key) {
            if !stored.protected_entry().matches_owner(&entry.protected_entry().owner_pub_key) {
                return Err(RejectReason::OwnerMismatch.into());
            }
        }

        let sequence_number = entry.sequence_number();
        if let Some(record) = txn.sequence_record(&key) {
            if sequence_number < record.sequence_number {
                return Err(RejectReason::StaleSequenceNumber {
                    received: sequence_number,
                    stored: record.sequence_number,
                }
                .into());
            }
            if sequence_number == record.sequence_number {
                return match txn.entry(&key) {
                    Some(stored) if stored.same_content(&entry) => Ok(AddOutcome::Duplicate),
                    _ => Err(RejectReason::ConflictingSequenceNumber(sequence_number).into()),
                };
            }
        }

        txn.apply(MapStoreMutation::PutEntry(key, entry));
        txn.apply(MapStoreMutation::RecordSequence(
            key,
            SequenceRecord { sequence_number, recorded_at: now },
        ));
        drop(txn);

        trace!(%key, %kind, sequence_number, "Entry added");
        self.emit(StorageEvent::Added { kind, key });
        Ok(AddOutcome::Added)
    }

    fn try_remove_protected(&self, removal: StorageEntry) -> StorageResult<RemoveOutcome> {
        removal.validate_shape()?;
        removal.protected_entry().payload.validate(self.limits.max_payload_size)?;
        if !removal.removal_signer_matches_payload() {
            return Err(RejectReason::OwnerMismatch.into());
        }
        if !removal.protected_entry().verify_signature() {
            return Err(RejectReason::InvalidSignature.into());
        }

        let key = removal.key()?;
        let kind = removal.kind();
        let store = self.stores.protected(kind);
        let now = self.clock.now_millis();
        let sequence_number = removal.sequence_number();
        let record = SequenceRecord { sequence_number, recorded_at: now };

        let mut txn = store.write()?;
        if let Some(stored) = txn.sequence_record(&key) {
            if sequence_number <= stored.sequence_number {
                return Err(RejectReason::StaleSequenceNumber {
                    received: sequence_number,
                    stored: stored.sequence_number,
                }
                .into());
            }
        }

        match txn.entry(&key) {
            None => {
                // The signer was checked against the key named in the payload, so
                // remember the removal against a late add
                txn.apply(MapStoreMutation::RecordSequence(key, record));
                return Ok(RemoveOutcome::NotFound);
            }
            Some(stored) if !removal.may_remove(stored) => {
                return Err(RejectReason::OwnerMismatch.into());
            }
            Some(_) => {}
        }

        txn.apply(MapStoreMutation::RemoveEntry(key));
        txn.apply(MapStoreMutation::RecordSequence(key, record));
        if kind.is_add_once() {
            txn.apply(MapStoreMutation::MarkRemoved(key));
        }
        drop(txn);

        trace!(%key, %kind, sequence_number, "Entry removed");
        self.emit(StorageEvent::Removed { kind, key });
        Ok(RemoveOutcome::Removed)
    }

    fn try_refresh(&self, refresh: &RefreshOfferMessage) -> StorageResult<RefreshOutcome> {
        let key = refresh.hash_of_payload;
        let Some(store) = self.locate(&key)? else {
            return Ok(RefreshOutcome::NotFound);
        };
        let kind = store.kind();
        let now = self.clock.now_millis();

        let mut txn = store.write()?;
        if let Some(stored) = txn.sequence_record(&key) {
            if refresh.sequence_number <= stored.sequence_number {
                return Err(RejectReason::StaleSequenceNumber {
                    received: refresh.sequence_number,
                    stored: stored.sequence_number,
                }
                .into());
            }
        }

        let Some(stored) = txn.entry(&key) else {
            return Ok(RefreshOutcome::NotFound);
        };
        let owner = stored.protected_entry().owner_pub_key;
        let payload_bytes = stored.protected_entry().payload.encode()?;
        if !refresh.verify_against(&payload_bytes, &owner) {
            return Err(RejectReason::InvalidSignature.into());
        }

        let mut updated = stored.clone();
        updated.protected_entry_mut().apply_refresh(refresh, now);
        txn.apply(MapStoreMutation::PutEntry(key, updated));
        txn.apply(MapStoreMutation::RecordSequence(
            key,
            SequenceRecord { sequence_number: refresh.sequence_number, recorded_at: now },
        ));
        drop(txn);

        trace!(%key, %kind, sequence_number = refresh.sequence_number, "Entry refreshed");
        self.emit(StorageEvent::Refreshed { kind, key });
        Ok(RefreshOutcome::Refreshed)
    }

    fn try_add_persistable(
        &self,
        payload: PersistablePayload,
        check_date: bool,
    ) -> StorageResult<PersistableOutcome> {
        payload.validate(self.limits.max_payload_size)?;
        if check_date {
            payload.check_date(self.clock.now_millis(), self.limits.date_tolerance)?;
        }

        let key = payload.hash()?;
        let kind = payload.kind();
        if !self.stores.persistable(kind).put_if_absent(key, payload)? {
            return Ok(PersistableOutcome::AlreadyPresent);
        }

        trace!(%key, %kind, "Persistable payload added");
        self.emit(StorageEvent::PersistableAdded { kind, key });
        Ok(PersistableOutcome::Added)
    }

    /// Administrative takedown of a persistable payload; local only
    pub fn remove_persistable_payload(&self, key: &StorageKey) -> StorageResult<bool> {
        for store in self.stores.persistable_stores() {
            if store.remove(key)? {
                debug!(%key, kind = %store.kind(), "Persistable payload removed");
                self.emit(StorageEvent::PersistableRemoved { kind: store.kind(), key: *key });
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Purge every protected entry whose TTL has elapsed
    pub fn remove_expired_entries(&self) -> StorageResult<usize> {
        let now = self.clock.now_millis();
        let mut total = 0;

        for store in self.stores.protected_stores() {
            let expired = store.remove_expired(now)?;
            for (key, _) in &expired {
                self.emit(StorageEvent::Expired { kind: store.kind(), key: *key });
            }
            if !expired.is_empty() {
                debug!(kind = %store.kind(), count = expired.len(), "Expired entries removed");
            }
            total += expired.len();
        }

        if total > 0 {
            self.stats.add_expired(total as u64);
            record_counter("storage.expired", total as u64);
        }
        Ok(total)
    }

    pub fn contains_key(&self, key: &StorageKey) -> StorageResult<bool> {
        for store in self.stores.protected_stores() {
            if store.contains_key(key)? {
                return Ok(true);
            }
        }
        for store in self.stores.persistable_stores() {
            if store.contains_key(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get(&self, key: &StorageKey) -> StorageResult<Option<StorageEntry>> {
        for store in self.stores.protected_stores() {
            if let Some(entry) = store.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn get_persistable(&self, key: &StorageKey) -> StorageResult<Option<PersistablePayload>> {
        for store in self.stores.persistable_stores() {
            if let Some(payload) = store.get(key)? {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    pub fn protected_entries(&self, kind: ProtectedKind) -> StorageResult<Vec<(StorageKey, StorageEntry)>> {
        Ok(self.stores.protected(kind).entries()?)
    }

    pub fn persistable_payloads(
        &self,
        kind: PersistableKind,
    ) -> StorageResult<Vec<(StorageKey, PersistablePayload)>> {
        Ok(self.stores.persistable(kind).payloads()?)
    }

    /// Number of live protected entries plus persistable payloads
    pub fn len(&self) -> StorageResult<usize> {
        let mut total = 0;
        for store in self.stores.protected_stores() {
            total += store.len()?;
        }
        for store in self.stores.persistable_stores() {
            total += store.len()?;
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Sequence number an owner should use for its next mutation of `key`
    pub fn next_sequence_number(&self, key: &StorageKey) -> StorageResult<u64> {
        for store in self.stores.protected_stores() {
            if let Some(record) = store.sequence_record(key)? {
                return Ok(record.sequence_number + 1);
            }
        }
        Ok(1)
    }

    /// Store holding an entry or a sequence record for `key`
    fn locate(&self, key: &StorageKey) -> StorageResult<Option<&Arc<MapStoreService>>> {
        for store in self.stores.protected_stores() {
            if store.contains_key(key)? || store.sequence_record(key)?.is_some() {
                return Ok(Some(store));
            }
        }
        Ok(None)
    }

    fn emit(&self, event: StorageEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn record_unknown_owner(&self, op: &'static str) {
        self.stats.inc_unknown_owner();
        metrics::counter!("storage.unknown_owner", "op" => op).increment(1);
        debug!(op, "No entry for key");
    }

    fn record_failure(&self, op: &'static str, error: &StorageError) {
        match error {
            StorageError::Rejected(reason) => {
                self.stats.inc_rejected();
                metrics::counter!("storage.rejected", "op" => op, "reason" => reason.as_label())
                    .increment(1);
                debug!(op, %reason, "Operation rejected");
            }
            StorageError::Store(e) => warn!(op, error = %e, "Store failure"),
        }
    }
}
