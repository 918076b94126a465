/*
    GossipHandler - glue between the transport, the storage engine and the broadcaster

    Responsibilities:
    `handler.rs` receives raw frames from peers, decodes them, hands them to the
    storage engine and relays accepted mutations to everyone else. It also
    exposes the owner-side operations (publish, refresh, remove) that sign with
    a local keypair and then broadcast like any other accepted message.

    Inputs:
    - frames + sender id from the transport
    - capability announcements and connection events
    - local publish requests

    Outputs:
    - InboundOutcome per frame
    - frames queued on peer outbound channels

    Notes:
    - inbound frames and local operations are refused until persisted data has been loaded
    - an idempotent replay or unknown key changes nothing and is not relayed
*/

use super::broadcaster::{BroadcastReport, Broadcaster, Outbound};
use super::capability_gate::CapabilityGate;
use super::message::{NetworkMessage, WireError};
use super::peer::PeerId;
use crate::core_payload::{
    Capabilities, Keypair, MailboxPayload, PayloadError, PersistablePayload,
    ProtectedMailboxStorageEntry, ProtectedPayload, ProtectedStorageEntry, RefreshOfferMessage,
    StorageEntry, StorageKey,
};
use crate::core_storage::engine::{
    AddOutcome, DataStorage, PersistableOutcome, RefreshOutcome, RemoveOutcome,
};
use crate::core_storage::error::{RejectReason, StorageError};
use crate::core_store::StoreError;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Result of handling one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Accepted and relayed
    Relayed(BroadcastReport),
    /// Valid but nothing changed (replay, unknown key, already present)
    NoChange,
    Rejected(RejectReason),
    InvalidFrame(WireError),
    StoreFailure(StoreError),
}

/// Errors of owner-side operations
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("No entry stored under {0}")]
    NotFound(StorageKey),

    #[error("Entry {0} has the wrong kind for this operation")]
    WrongEntryKind(StorageKey),
}

pub type PublishResult = Result<BroadcastReport, PublishError>;

pub struct GossipHandler {
    storage: Arc<DataStorage>,
    broadcaster: Arc<Broadcaster>,
    ready: watch::Receiver<bool>,
    max_frame_size: usize,
}

impl GossipHandler {
    pub fn new(
        storage: Arc<DataStorage>,
        broadcaster: Arc<Broadcaster>,
        ready: watch::Receiver<bool>,
        max_frame_size: usize,
    ) -> Self {
        Self { storage, broadcaster, ready, max_frame_size }
    }

    pub fn storage(&self) -> &Arc<DataStorage> {
        &self.storage
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn gate(&self) -> &Arc<CapabilityGate> {
        self.broadcaster.gate()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn on_peer_connected(&self, peer: PeerId, outbound: Outbound) {
        self.broadcaster.connect(peer, outbound).await;
    }

    pub async fn on_peer_disconnected(&self, peer: &PeerId) {
        self.broadcaster.disconnect(peer).await;
    }

    pub async fn on_capabilities(&self, peer: PeerId, capabilities: Capabilities) {
        self.gate().announce(peer, capabilities).await;
    }

    /// Process one frame received from `from`
    pub async fn handle_frame(&self, from: &PeerId, frame: &[u8]) -> InboundOutcome {
        if !self.is_ready() {
            debug!(peer = %from, "Dropping frame, persisted data not loaded yet");
            counter!("storage.rejected", "op" => "inbound", "reason" => "not_ready").increment(1);
            return InboundOutcome::Rejected(RejectReason::NotReady);
        }

        let message = match NetworkMessage::decode(frame, self.max_frame_size) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer = %from, error = %e, "Dropping undecodable frame");
                counter!("gossip.inbound.invalid").increment(1);
                return InboundOutcome::InvalidFrame(e);
            }
        };
        counter!("gossip.inbound.received", "type" => message.label()).increment(1);

        match self.apply(&message) {
            Ok(true) => match self.broadcaster.broadcast(&message, Some(from)).await {
                Ok(report) => InboundOutcome::Relayed(report),
                Err(e) => InboundOutcome::InvalidFrame(e),
            },
            Ok(false) => InboundOutcome::NoChange,
            Err(StorageError::Rejected(reason)) => {
                debug!(peer = %from, message = message.label(), %reason, "Rejected inbound message");
                InboundOutcome::Rejected(reason)
            }
            Err(StorageError::Store(e)) => {
                warn!(peer = %from, message = message.label(), error = %e, "Store failure on inbound message");
                InboundOutcome::StoreFailure(e)
            }
        }
    }

    /// Hand a decoded message to the engine; true when something changed
    fn apply(&self, message: &NetworkMessage) -> Result<bool, StorageError> {
        Ok(match message {
            NetworkMessage::AddData(entry) => {
                self.storage.add_protected_entry(entry.clone())? == AddOutcome::Added
            }
            NetworkMessage::RemoveData(entry) => {
                self.storage.remove_protected_entry(entry.clone())? == RemoveOutcome::Removed
            }
            NetworkMessage::RefreshOffer(refresh) => {
                self.storage.refresh_ttl(refresh)? == RefreshOutcome::Refreshed
            }
            NetworkMessage::AddPersistablePayload(payload) => {
                self.storage.add_persistable_payload(payload.clone(), true)? == PersistableOutcome::Added
            }
        })
    }

    /// Local mutations before the stores are loaded would be overwritten by the load
    fn ensure_ready(&self, op: &'static str) -> Result<(), PublishError> {
        if self.is_ready() {
            return Ok(());
        }
        debug!(op, "Refusing local operation, persisted data not loaded yet");
        counter!("storage.rejected", "op" => op, "reason" => "not_ready").increment(1);
        Err(StorageError::Rejected(RejectReason::NotReady).into())
    }

    /// Sign and publish a payload we own
    pub async fn publish_protected(&self, payload: ProtectedPayload, keypair: &Keypair) -> PublishResult {
        self.ensure_ready("publish_protected")?;
        let key = payload.hash()?;
        let sequence_number = self.storage.next_sequence_number(&key)?;
        let entry = ProtectedStorageEntry::sign(payload, sequence_number, keypair, self.now())?;

        self.add_and_broadcast(StorageEntry::Protected(entry)).await
    }

    /// Deposit a message for the receiver named in `payload`
    pub async fn publish_mailbox(&self, payload: MailboxPayload, sender: &Keypair) -> PublishResult {
        self.ensure_ready("publish_mailbox")?;
        let key = ProtectedPayload::Mailbox(payload.clone()).hash()?;
        let sequence_number = self.storage.next_sequence_number(&key)?;
        let entry =
            ProtectedMailboxStorageEntry::for_receiver(payload, sequence_number, sender, self.now())?;

        self.add_and_broadcast(StorageEntry::Mailbox(entry)).await
    }

    /// Extend the TTL of one of our entries without resending the payload
    pub async fn refresh_own(&self, key: &StorageKey, keypair: &Keypair) -> PublishResult {
        self.ensure_ready("refresh_own")?;
        let payload = match self.storage.get(key)? {
            Some(StorageEntry::Protected(entry)) => entry.payload,
            Some(StorageEntry::Mailbox(_)) => return Err(PublishError::WrongEntryKind(*key)),
            None => return Err(PublishError::NotFound(*key)),
        };
        let sequence_number = self.storage.next_sequence_number(key)?;
        let refresh = RefreshOfferMessage::sign(&payload, sequence_number, keypair)?;

        if self.storage.refresh_ttl(&refresh)? == RefreshOutcome::NotFound {
            return Err(PublishError::NotFound(*key));
        }
        Ok(self.broadcaster.broadcast(&NetworkMessage::RefreshOffer(refresh), None).await?)
    }

    /// Withdraw one of our entries
    pub async fn remove_own(&self, key: &StorageKey, keypair: &Keypair) -> PublishResult {
        self.ensure_ready("remove_own")?;
        let payload = match self.storage.get(key)? {
            Some(StorageEntry::Protected(entry)) => entry.payload,
            Some(StorageEntry::Mailbox(_)) => return Err(PublishError::WrongEntryKind(*key)),
            None => return Err(PublishError::NotFound(*key)),
        };
        let sequence_number = self.storage.next_sequence_number(key)?;
        let removal = ProtectedStorageEntry::sign(payload, sequence_number, keypair, self.now())?;

        self.remove_and_broadcast(*key, StorageEntry::Protected(removal)).await
    }

    /// Remove a mailbox message addressed to us once it has been read
    pub async fn remove_mailbox(&self, key: &StorageKey, receiver: &Keypair) -> PublishResult {
        self.ensure_ready("remove_mailbox")?;
        let payload = match self.storage.get(key)? {
            Some(StorageEntry::Mailbox(mailbox)) => match mailbox.entry.payload {
                ProtectedPayload::Mailbox(payload) => payload,
                _ => return Err(PublishError::WrongEntryKind(*key)),
            },
            Some(StorageEntry::Protected(_)) => return Err(PublishError::WrongEntryKind(*key)),
            None => return Err(PublishError::NotFound(*key)),
        };
        let sequence_number = self.storage.next_sequence_number(key)?;
        let removal =
            ProtectedMailboxStorageEntry::removal(payload, sequence_number, receiver, self.now())?;

        self.remove_and_broadcast(*key, StorageEntry::Mailbox(removal)).await
    }

    /// Publish a persistable payload created locally (no date tolerance check)
    pub async fn publish_persistable(&self, payload: PersistablePayload) -> PublishResult {
        self.ensure_ready("publish_persistable")?;
        match self.storage.add_persistable_payload(payload.clone(), false)? {
            PersistableOutcome::Added => Ok(self
                .broadcaster
                .broadcast(&NetworkMessage::AddPersistablePayload(payload), None)
                .await?),
            PersistableOutcome::AlreadyPresent => Ok(BroadcastReport::default()),
        }
    }

    async fn add_and_broadcast(&self, entry: StorageEntry) -> PublishResult {
        match self.storage.add_protected_entry(entry.clone())? {
            AddOutcome::Added => {
                Ok(self.broadcaster.broadcast(&NetworkMessage::AddData(entry), None).await?)
            }
            AddOutcome::Duplicate => Ok(BroadcastReport::default()),
        }
    }

    async fn remove_and_broadcast(&self, key: StorageKey, removal: StorageEntry) -> PublishResult {
        match self.storage.remove_protected_entry(removal.clone())? {
            RemoveOutcome::Removed => {
                Ok(self.broadcaster.broadcast(&NetworkMessage::RemoveData(removal), None).await?)
            }
            RemoveOutcome::NotFound => Err(PublishError::NotFound(key)),
        }
    }

    fn now(&self) -> u64 {
        self.storage.clock().now_millis()
    }
}
