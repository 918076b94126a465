//! Periodic expiry of protected entries
//!
//! The sweeper is the only path by which entries nobody refreshes disappear.
//! It runs on a fixed interval, independent of message traffic, and stops before
//! its next iteration once shutdown is signalled. A sweep itself is synchronous,
//! so it is never interrupted halfway.

use super::engine::DataStorage;
use crate::metrics::Timer;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ExpirySweeper {
    storage: Arc<DataStorage>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(storage: Arc<DataStorage>, interval: Duration) -> Self {
        Self { storage, interval }
    }

    /// Run one sweep now, returning the number of entries removed
    pub fn sweep_once(&self) -> usize {
        let timer = Timer::new("storage.sweep.duration_ms");
        let removed = match self.storage.remove_expired_entries() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Expiry sweep failed");
                0
            }
        };
        timer.stop();

        debug!(removed, "Expiry sweep finished");
        removed
    }

    /// Sweep every interval until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "Expiry sweeper started");

        loop {
            tokio::select! {
                biased;
                signal = shutdown.recv() => {
                    info!(?signal, "Expiry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<ShutdownSignal>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_payload::{Keypair, OfferDirection, OfferPayload, ProtectedPayload, ProtectedStorageEntry};
    use crate::core_storage::clock::ManualClock;
    use crate::core_storage::engine::StorageLimits;
    use crate::core_store::StoreTable;

    fn storage(clock: Arc<ManualClock>) -> Arc<DataStorage> {
        let stores = Arc::new(StoreTable::in_memory(
            |_| Duration::from_secs(60),
            Duration::from_secs(3600),
            clock.clone(),
        ));
        Arc::new(DataStorage::new(stores, clock, StorageLimits::default()))
    }

    fn add_offer(storage: &DataStorage, now: u64) {
        let owner = Keypair::from_seed([1u8; 32]);
        let payload = ProtectedPayload::Offer(OfferPayload {
            id: "sweep-me".to_string(),
            owner_pub_key: owner.public_key(),
            direction: OfferDirection::Buy,
            currency_code: "EUR".to_string(),
            price: 1,
            amount: 1,
            min_amount: 1,
            payment_method: "SEPA".to_string(),
            date: 0,
        });
        let entry = ProtectedStorageEntry::sign(payload, 1, &owner, now).unwrap();
        storage.add_protected_entry(entry.into()).unwrap();
    }

    #[test]
    fn test_sweep_once() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = storage(clock.clone());
        add_offer(&storage, 0);
        let sweeper = ExpirySweeper::new(storage.clone(), Duration::from_secs(60));

        clock.set(60_000);
        assert_eq!(sweeper.sweep_once(), 0);

        clock.set(60_001);
        assert_eq!(sweeper.sweep_once(), 1);
        assert!(storage.is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_interval_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = storage(clock.clone());
        add_offer(&storage, 0);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = ExpirySweeper::new(storage.clone(), Duration::from_secs(60)).spawn(shutdown_rx);

        clock.set(61_000);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(storage.is_empty().unwrap());

        shutdown_tx.send(ShutdownSignal::Graceful).unwrap();
        handle.await.unwrap();
    }
}
