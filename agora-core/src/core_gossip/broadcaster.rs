/*
    Broadcaster - fan-out of accepted storage messages to connected peers

    Responsibilities:
    `broadcaster.rs` owns the outbound queue of every connected peer. A message
    is encoded once and the same frame is enqueued for each eligible peer.

    A peer is skipped when:
    - it is the peer the message came from
    - the capability gate vetoes it for this payload
    - its queue is full or closed (the frame is dropped for that peer only)

    Identical messages seen within the dedup window are not broadcast again,
    which keeps a flooding loop from forming between peers that relay to each
    other. Delivery is at most once per hop; nothing here blocks on a slow peer.
*/

use super::capability_gate::CapabilityGate;
use super::message::{MessageId, NetworkMessage, WireError};
use super::peer::PeerId;
use crate::metrics::record_gauge;
use hashlink::LruCache;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Outbound frames for one peer
pub type Outbound = mpsc::Sender<Arc<Vec<u8>>>;

/// What happened to one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was enqueued for
    pub sent: usize,
    /// The origin was connected and skipped
    pub skipped_origin: bool,
    /// Peers vetoed by the capability gate
    pub skipped_capability: usize,
    /// Peers whose queue was full or closed
    pub dropped: usize,
    /// Same message already broadcast within the dedup window
    pub duplicate: bool,
}

pub struct Broadcaster {
    peers: RwLock<HashMap<PeerId, Outbound>>,
    gate: Arc<CapabilityGate>,
    seen: Mutex<LruCache<MessageId, Instant>>,
    dedup_window: Duration,
}

impl Broadcaster {
    pub fn new(gate: Arc<CapabilityGate>, dedup_capacity: usize, dedup_window: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            gate,
            seen: Mutex::new(LruCache::new(dedup_capacity.max(1))),
            dedup_window,
        }
    }

    pub fn gate(&self) -> &Arc<CapabilityGate> {
        &self.gate
    }

    /// Register the outbound queue of a freshly connected peer
    pub async fn connect(&self, peer: PeerId, outbound: Outbound) {
        let mut peers = self.peers.write().await;
        peers.insert(peer.clone(), outbound);
        record_gauge("gossip.peers.connected", peers.len() as f64);
        debug!(%peer, connected = peers.len(), "Peer connected");
    }

    /// Drop the peer's queue and whatever it announced
    pub async fn disconnect(&self, peer: &PeerId) {
        let mut peers = self.peers.write().await;
        if peers.remove(peer).is_some() {
            debug!(%peer, connected = peers.len(), "Peer disconnected");
        }
        record_gauge("gossip.peers.connected", peers.len() as f64);
        drop(peers);

        self.gate.forget(peer).await;
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.read().await.contains_key(peer)
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Relay `message` to every eligible peer except `origin`
    pub async fn broadcast(
        &self,
        message: &NetworkMessage,
        origin: Option<&PeerId>,
    ) -> Result<BroadcastReport, WireError> {
        let frame = Arc::new(message.encode()?);
        let id = MessageId::of_frame(&frame);
        let mut report = BroadcastReport::default();

        if self.already_seen(id).await {
            trace!(message = message.label(), %id, "Suppressing duplicate broadcast");
            counter!("gossip.broadcast.skipped", "reason" => "duplicate").increment(1);
            report.duplicate = true;
            return Ok(report);
        }

        let required = message.required_capabilities();
        let peers = self.peers.read().await;

        for (peer, outbound) in peers.iter() {
            if Some(peer) == origin {
                report.skipped_origin = true;
                continue;
            }
            if !self.gate.allows(peer, &required).await {
                report.skipped_capability += 1;
                continue;
            }

            match outbound.try_send(Arc::clone(&frame)) {
                Ok(()) => report.sent += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(%peer, "Outbound queue full, dropping frame");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%peer, "Outbound queue closed, dropping frame");
                    report.dropped += 1;
                }
            }
        }
        drop(peers);

        counter!("gossip.broadcast.sent").increment(report.sent as u64);
        if report.skipped_capability > 0 {
            counter!("gossip.broadcast.skipped", "reason" => "capability")
                .increment(report.skipped_capability as u64);
        }
        if report.dropped > 0 {
            counter!("gossip.broadcast.skipped", "reason" => "queue").increment(report.dropped as u64);
        }

        trace!(
            message = message.label(),
            %id,
            sent = report.sent,
            skipped_capability = report.skipped_capability,
            dropped = report.dropped,
            "Broadcast finished"
        );
        Ok(report)
    }

    /// Returns true if `id` was seen within the window; otherwise records it as seen now
    async fn already_seen(&self, id: MessageId) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;

        if let Some(at) = seen.get(&id) {
            if now.duration_since(*at) < self.dedup_window {
                return true;
            }
        }
        seen.insert(id, now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_payload::{
        AccountAgeWitnessPayload, Capabilities, Capability, PersistablePayload,
    };

    fn message(seed: u8) -> NetworkMessage {
        NetworkMessage::AddPersistablePayload(PersistablePayload::AccountAgeWitness(
            AccountAgeWitnessPayload { hash: vec![seed; 20], date: 1 },
        ))
    }

    async fn setup(peers: &[&str]) -> (Broadcaster, Vec<mpsc::Receiver<Arc<Vec<u8>>>>) {
        let gate = Arc::new(CapabilityGate::new());
        let broadcaster = Broadcaster::new(gate.clone(), 16, Duration::from_secs(60));
        let mut receivers = Vec::new();

        for name in peers {
            let (tx, rx) = mpsc::channel(4);
            gate.announce(PeerId::new(*name), Capabilities::all()).await;
            broadcaster.connect(PeerId::new(*name), tx).await;
            receivers.push(rx);
        }
        (broadcaster, receivers)
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin() {
        let (broadcaster, mut receivers) = setup(&["a", "b", "c"]).await;
        let origin = PeerId::new("a");

        let report = broadcaster.broadcast(&message(1), Some(&origin)).await.unwrap();

        assert_eq!(report.sent, 2);
        assert!(report.skipped_origin);
        assert!(receivers[0].try_recv().is_err());
        assert!(receivers[1].try_recv().is_ok());
        assert!(receivers[2].try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_suppressed_within_window() {
        let (broadcaster, _receivers) = setup(&["a"]).await;

        let first = broadcaster.broadcast(&message(1), None).await.unwrap();
        let second = broadcaster.broadcast(&message(1), None).await.unwrap();

        assert_eq!(first.sent, 1);
        assert!(second.duplicate);
        assert_eq!(second.sent, 0);
        assert_eq!(broadcaster.seen_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_allowed_after_window() {
        let (broadcaster, _receivers) = setup(&["a"]).await;

        broadcaster.broadcast(&message(1), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let again = broadcaster.broadcast(&message(1), None).await.unwrap();

        assert!(!again.duplicate);
        assert_eq!(again.sent, 1);
    }

    #[tokio::test]
    async fn test_capability_veto_counted() {
        let gate = Arc::new(CapabilityGate::new());
        let broadcaster = Broadcaster::new(gate.clone(), 16, Duration::from_secs(60));
        let (old_tx, mut old_rx) = mpsc::channel(4);
        let (new_tx, mut new_rx) = mpsc::channel(4);

        broadcaster.connect(PeerId::new("old"), old_tx).await;
        broadcaster.connect(PeerId::new("new"), new_tx).await;
        gate.announce(PeerId::new("new"), Capability::AccountAgeWitness.into()).await;

        let report = broadcaster.broadcast(&message(2), None).await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped_capability, 1);
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(CapabilityGate::new());
        let broadcaster = Broadcaster::new(gate.clone(), 16, Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(1);
        gate.announce(PeerId::new("slow"), Capabilities::all()).await;
        broadcaster.connect(PeerId::new("slow"), tx).await;

        assert_eq!(broadcaster.broadcast(&message(1), None).await.unwrap().sent, 1);
        let report = broadcaster.broadcast(&message(2), None).await.unwrap();

        assert_eq!(report.sent, 0);
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_disconnect_forgets_capabilities() {
        let (broadcaster, _receivers) = setup(&["a"]).await;
        let peer = PeerId::new("a");

        broadcaster.disconnect(&peer).await;

        assert!(!broadcaster.is_connected(&peer).await);
        assert!(broadcaster.gate().capabilities_of(&peer).await.is_none());
    }
}
