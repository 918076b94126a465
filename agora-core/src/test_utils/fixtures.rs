//! Test fixtures for creating common test objects
//!
//! Provides builder patterns and factory functions for creating test data.

use crate::core_gossip::{Broadcaster, CapabilityGate, GossipHandler};
use crate::core_payload::{
    AccountAgeWitnessPayload, AgentRole, DisputeAgentPayload, Keypair, MailboxPayload,
    OfferDirection, OfferPayload, OwnerKey, PayloadError, PersistablePayload, ProtectedPayload,
    ProtectedStorageEntry, SignedWitnessPayload, StorageEntry, TradeStatisticsPayload,
};
use crate::core_storage::{DataStorage, ManualClock, StorageLimits};
use crate::core_store::StoreTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Builder for offer payloads owned by a test keypair
pub struct TestOfferBuilder {
    offer: OfferPayload,
}

impl TestOfferBuilder {
    pub fn new(owner: &Keypair) -> Self {
        Self {
            offer: OfferPayload {
                id: "offer-1".to_string(),
                owner_pub_key: owner.public_key(),
                direction: OfferDirection::Buy,
                currency_code: "EUR".to_string(),
                price: 3_000_000,
                amount: 1_000_000,
                min_amount: 100_000,
                payment_method: "SEPA".to_string(),
                date: 0,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.offer.id = id.into();
        self
    }

    pub fn selling(mut self) -> Self {
        self.offer.direction = OfferDirection::Sell;
        self
    }

    pub fn with_currency(mut self, code: impl Into<String>) -> Self {
        self.offer.currency_code = code.into();
        self
    }

    pub fn with_amounts(mut self, amount: u64, min_amount: u64) -> Self {
        self.offer.amount = amount;
        self.offer.min_amount = min_amount;
        self
    }

    pub fn with_date(mut self, date: u64) -> Self {
        self.offer.date = date;
        self
    }

    pub fn build(self) -> ProtectedPayload {
        ProtectedPayload::Offer(self.offer)
    }
}

/// Offer payload with default fields and the given id
pub fn offer_payload(owner: &Keypair, id: &str) -> ProtectedPayload {
    TestOfferBuilder::new(owner).with_id(id).build()
}

/// Signed protected entry wrapping `payload`
pub fn signed_entry(
    payload: ProtectedPayload,
    sequence_number: u64,
    owner: &Keypair,
    now: u64,
) -> Result<StorageEntry, PayloadError> {
    Ok(StorageEntry::Protected(ProtectedStorageEntry::sign(payload, sequence_number, owner, now)?))
}

pub fn dispute_agent_payload(owner: &Keypair, role: AgentRole) -> ProtectedPayload {
    ProtectedPayload::DisputeAgent(DisputeAgentPayload {
        role,
        node_address: "agent.onion:9999".to_string(),
        owner_pub_key: owner.public_key(),
        languages: vec!["en".to_string(), "de".to_string()],
        registration_date: 0,
        contact: None,
    })
}

pub fn mailbox_payload(sender: &Keypair, receiver: OwnerKey, uid: &str) -> MailboxPayload {
    MailboxPayload {
        uid: uid.to_string(),
        sender_pub_key: sender.public_key(),
        receiver_pub_key: receiver,
        sealed_message: vec![0xAB; 64],
    }
}

pub fn trade_statistics(currency_code: &str, price: u64, date: u64) -> PersistablePayload {
    PersistablePayload::TradeStatistics(TradeStatisticsPayload {
        currency_code: currency_code.to_string(),
        price,
        amount: 10_000,
        payment_method: "SEPA".to_string(),
        date,
    })
}

pub fn account_age_witness(seed: u8, date: u64) -> PersistablePayload {
    PersistablePayload::AccountAgeWitness(AccountAgeWitnessPayload { hash: vec![seed; 20], date })
}

pub fn signed_witness(signer: &Keypair, witness_owner: OwnerKey, date: u64) -> PersistablePayload {
    let hash = vec![7u8; 20];
    PersistablePayload::SignedWitness(SignedWitnessPayload {
        signature: signer.sign(&hash).as_bytes().to_vec(),
        account_age_witness_hash: hash,
        signer_pub_key: signer.public_key(),
        witness_owner_pub_key: witness_owner,
        trade_amount: 50_000,
        date,
    })
}

/// In-memory storage engine driven by a manual clock
pub struct TestStorage {
    pub storage: Arc<DataStorage>,
    pub clock: Arc<ManualClock>,
}

impl TestStorage {
    /// Every protected kind gets its default TTL
    pub fn new(start_millis: u64) -> Self {
        Self::with_ttl(start_millis, |kind| kind.default_ttl())
    }

    /// Same TTL for every protected kind
    pub fn with_uniform_ttl(start_millis: u64, ttl: Duration) -> Self {
        Self::with_ttl(start_millis, move |_| ttl)
    }

    pub fn with_ttl(
        start_millis: u64,
        ttl_of: impl Fn(crate::core_payload::ProtectedKind) -> Duration,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_millis));
        let stores = Arc::new(StoreTable::in_memory(ttl_of, Duration::from_secs(3600), clock.clone()));
        let storage = Arc::new(DataStorage::new(stores, clock.clone(), StorageLimits::default()));
        Self { storage, clock }
    }

    /// Gossip handler over this storage, ready for inbound frames
    pub fn handler(&self) -> GossipHandler {
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::new(CapabilityGate::new()),
            1024,
            Duration::from_secs(60),
        ));
        let (ready_tx, ready_rx) = watch::channel(true);
        // the receiver keeps the last value after the sender is gone
        drop(ready_tx);
        GossipHandler::new(self.storage.clone(), broadcaster, ready_rx, 1024 * 1024)
    }
}
