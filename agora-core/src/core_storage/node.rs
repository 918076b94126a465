/*
    StorageNode - wires stores, engine, sweeper and gossip into one running node

    Responsibilities:
    `node.rs` builds one map store per protected kind and one historical store
    per persistable kind under the configured data directory, registers them
    as persisted data hosts and assembles the engine, capability gate,
    broadcaster and gossip handler around them.

    Lifecycle:
    1. new()      - build everything, nothing touches disk yet
    2. start()    - load every store, signal ready, start the expiry sweeper
    3. shutdown() - stop the sweeper, flush every store

    Inbound frames and local publishes handed to the handler before start()
    completes are refused with NotReady.
*/

use super::clock::Clock;
use super::engine::{DataStorage, StorageLimits};
use super::sweeper::ExpirySweeper;
use crate::config::{Config, ConfigError};
use crate::core_gossip::{Broadcaster, CapabilityGate, GossipHandler, Outbound};
use crate::core_store::{PersistenceOptions, StoreError, StoreRegistry, StoreTable};
use crate::metrics::init_metrics;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Node already started")]
    AlreadyStarted,
}

pub struct StorageNode {
    config: Config,
    registry: Arc<StoreRegistry>,
    storage: Arc<DataStorage>,
    handler: Arc<GossipHandler>,
    coordinator: ShutdownCoordinator,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StorageNode {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Self, NodeError> {
        config.validate()?;
        if config.metrics.enabled {
            init_metrics();
        }

        let storage_config = &config.storage;
        let ttl = storage_config.ttl.clone();
        let stores = Arc::new(StoreTable::persistent(
            &storage_config.data_dir,
            move |kind| ttl.for_kind(kind),
            storage_config.sequence_purge_age,
            PersistenceOptions {
                retry_delay: storage_config.persist_retry_delay,
                max_snapshot_size: storage_config.max_snapshot_size as u64,
            },
            clock.clone(),
        ));

        let registry = Arc::new(StoreRegistry::new());
        stores.register_all(&registry)?;

        let limits = StorageLimits {
            max_payload_size: storage_config.max_payload_size,
            date_tolerance: storage_config.date_tolerance,
        };
        let storage = Arc::new(DataStorage::new(stores, clock, limits));

        let broadcaster = Arc::new(Broadcaster::new(
            Arc::new(CapabilityGate::new()),
            config.broadcast.dedup_capacity,
            config.broadcast.dedup_window,
        ));
        let handler = Arc::new(GossipHandler::new(
            storage.clone(),
            broadcaster,
            registry.ready(),
            config.broadcast.max_frame_size,
        ));

        Ok(Self {
            coordinator: ShutdownCoordinator::new(config.shutdown.timeout),
            config,
            registry,
            storage,
            handler,
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<DataStorage> {
        &self.storage
    }

    pub fn handler(&self) -> &Arc<GossipHandler> {
        &self.handler
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    /// Outbound queue sized for one peer connection
    pub fn peer_queue(&self) -> (Outbound, mpsc::Receiver<Arc<Vec<u8>>>) {
        mpsc::channel(self.config.broadcast.peer_queue_size)
    }

    /// Load persisted data, open the gate for inbound traffic and start sweeping
    ///
    /// Returns the number of items loaded.
    pub async fn start(&self) -> Result<usize, NodeError> {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() || self.registry.is_ready() {
            return Err(NodeError::AlreadyStarted);
        }

        let loaded = self.registry.read_all_persisted()?;
        *sweeper = Some(
            ExpirySweeper::new(self.storage.clone(), self.config.sweeper.interval)
                .spawn(self.coordinator.subscribe()),
        );

        info!(
            data_dir = %self.config.storage.data_dir.display(),
            loaded,
            "Storage node started"
        );
        Ok(loaded)
    }

    /// Stop background work and flush every store to disk
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        if !self.coordinator.shutdown().await {
            return Ok(());
        }

        if let Some(handle) = self.sweeper.lock().await.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.coordinator.timeout(), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Expiry sweeper task failed"),
                Err(_) => {
                    warn!(timeout = ?self.coordinator.timeout(), "Expiry sweeper did not stop in time");
                    abort.abort();
                }
            }
        }

        let flushed = self.registry.flush_all().await;
        self.coordinator.complete().await;
        flushed?;

        info!("Storage node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_gossip::PublishError;
    use crate::core_payload::{Keypair, OfferDirection, OfferPayload, ProtectedPayload};
    use crate::core_storage::clock::ManualClock;
    use crate::core_storage::error::{RejectReason, StorageError};

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config.metrics.enabled = false;
        config
    }

    fn offer(owner: &Keypair) -> ProtectedPayload {
        ProtectedPayload::Offer(OfferPayload {
            id: "node-offer".to_string(),
            owner_pub_key: owner.public_key(),
            direction: OfferDirection::Buy,
            currency_code: "EUR".to_string(),
            price: 25_000,
            amount: 100,
            min_amount: 10,
            payment_method: "SEPA".to_string(),
            date: 5_000,
        })
    }

    #[tokio::test]
    async fn test_start_signals_ready_once() {
        let dir = tempfile::tempdir().unwrap();
        let node = StorageNode::new(config(dir.path()), Arc::new(ManualClock::new(5_000))).unwrap();

        assert!(!node.is_ready());
        assert!(!node.handler().is_ready());
        assert_eq!(node.start().await.unwrap(), 0);
        assert!(node.is_ready());
        assert!(node.handler().is_ready());
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(5_000));
        let owner = Keypair::from_seed([8u8; 32]);
        let key = offer(&owner).hash().unwrap();

        let node = StorageNode::new(config(dir.path()), clock.clone()).unwrap();
        node.start().await.unwrap();
        node.handler().publish_protected(offer(&owner), &owner).await.unwrap();
        node.shutdown().await.unwrap();
        drop(node);

        let node = StorageNode::new(config(dir.path()), clock).unwrap();
        assert_eq!(node.start().await.unwrap(), 1);
        assert!(node.storage().contains_key(&key).unwrap());
        assert_eq!(node.storage().next_sequence_number(&key).unwrap(), 2);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_before_start_refused() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Keypair::from_seed([9u8; 32]);
        let key = offer(&owner).hash().unwrap();
        let node = StorageNode::new(config(dir.path()), Arc::new(ManualClock::new(5_000))).unwrap();

        assert!(matches!(
            node.handler().publish_protected(offer(&owner), &owner).await,
            Err(PublishError::Storage(StorageError::Rejected(RejectReason::NotReady)))
        ));
        assert!(!node.storage().contains_key(&key).unwrap());

        node.start().await.unwrap();
        node.handler().publish_protected(offer(&owner), &owner).await.unwrap();
        assert!(node.storage().contains_key(&key).unwrap());
        assert_eq!(node.storage().next_sequence_number(&key).unwrap(), 2);
        node.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.broadcast.dedup_capacity = 0;

        assert!(matches!(
            StorageNode::new(config, Arc::new(ManualClock::new(0))),
            Err(NodeError::Config(_))
        ));
    }
}
