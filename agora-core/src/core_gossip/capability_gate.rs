/*
    CapabilityGate - decides which peers may receive which data

    Peers announce their capability set at handshake time (and may re-announce).
    Data that requires capabilities is only relayed to peers that announced all
    of them; a peer that never announced anything is treated as an old client.
    Vetoes are routing decisions, not errors.
*/

use super::peer::PeerId;
use crate::core_payload::Capabilities;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct CapabilityGate {
    peers: RwLock<HashMap<PeerId, Capabilities>>,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure gate decision
    pub fn should_send_to(peer_capabilities: Option<&Capabilities>, required: &Capabilities) -> bool {
        if required.is_empty() {
            return true;
        }
        match peer_capabilities {
            Some(capabilities) => capabilities.contains_all(required),
            None => false,
        }
    }

    /// Record (or replace) what `peer` supports
    pub async fn announce(&self, peer: PeerId, capabilities: Capabilities) {
        debug!(%peer, %capabilities, "Peer announced capabilities");
        self.peers.write().await.insert(peer, capabilities);
    }

    pub async fn forget(&self, peer: &PeerId) {
        self.peers.write().await.remove(peer);
    }

    pub async fn capabilities_of(&self, peer: &PeerId) -> Option<Capabilities> {
        self.peers.read().await.get(peer).cloned()
    }

    /// Gate decision for a known peer id, logging vetoes
    pub async fn allows(&self, peer: &PeerId, required: &Capabilities) -> bool {
        let peers = self.peers.read().await;
        let announced = peers.get(peer);
        let allowed = Self::should_send_to(announced, required);

        if !allowed {
            match announced {
                Some(capabilities) => {
                    debug!(%peer, missing = ?capabilities.missing(required), "Not relaying to peer")
                }
                None => debug!(%peer, %required, "Not relaying to peer without announced capabilities"),
            }
        }
        allowed
    }
}
