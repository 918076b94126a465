//! In-process storage counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the storage engine
#[derive(Debug, Default)]
pub struct StorageStats {
    added: AtomicU64,
    duplicates: AtomicU64,
    removed: AtomicU64,
    refreshed: AtomicU64,
    unknown_owner: AtomicU64,
    expired: AtomicU64,
    persistable_added: AtomicU64,
    persistable_duplicates: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`StorageStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub added: u64,
    pub duplicates: u64,
    pub removed: u64,
    pub refreshed: u64,
    pub unknown_owner: u64,
    pub expired: u64,
    pub persistable_added: u64,
    pub persistable_duplicates: u64,
    pub rejected: u64,
}

impl StorageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_added(&self) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refreshed(&self) {
        self.refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unknown_owner(&self) {
        self.unknown_owner.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_persistable_added(&self) {
        self.persistable_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persistable_duplicates(&self) {
        self.persistable_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            unknown_owner: self.unknown_owner.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            persistable_added: self.persistable_added.load(Ordering::Relaxed),
            persistable_duplicates: self.persistable_duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
