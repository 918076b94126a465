//! Graceful shutdown coordinator

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
///
/// Background tasks subscribe before they start and stop before their next
/// iteration once a signal arrives. `timeout` bounds how long the owner waits
/// for them to finish.
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self { state: Arc::new(RwLock::new(ShutdownState::Running)), shutdown_tx, timeout }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Initiate graceful shutdown; returns false if one was already in progress
    pub async fn shutdown(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return false;
        }

        info!("Initiating graceful shutdown");
        *state = ShutdownState::ShuttingDown;
        drop(state);

        // No subscribers just means no background tasks are running
        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            info!("No tasks subscribed to shutdown");
        }
        true
    }

    /// Mark shutdown as finished once every task has stopped
    pub async fn complete(&self) {
        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Initiate immediate shutdown
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");

        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        drop(state);

        if let Err(e) = self.shutdown_tx.send(ShutdownSignal::Immediate) {
            error!("Failed to send immediate shutdown signal: {}", e);
        }
    }

    /// Check if shutdown is in progress
    pub async fn is_shutting_down(&self) -> bool {
        let state = self.state.read().await;
        *state == ShutdownState::ShuttingDown || *state == ShutdownState::Shutdown
    }

    /// Get current state
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
