/*
    Payload - the two closed families of data replicated by the storage network

    Responsibilities:
    `payload.rs` defines every kind of data peers gossip about. Protected payloads
    (offers, dispute agent registrations, mailbox messages) are owned by a key and
    wrapped in signed entries; persistable payloads (trade statistics, witnesses)
    are immutable and keyed by the hash of their bytes.

    Inputs:
    - payload fields supplied by publishers or decoded from the wire

    Outputs:
    - canonical bincode encoding and content hashes
    - per-kind metadata (TTL, required capabilities, add-once)
    - structural validation results
*/

use super::capability::{Capabilities, Capability};
use super::keys::OwnerKey;
use super::storage_key::StorageKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const MINUTE_MILLIS: u64 = 60 * 1000;
const DAY_MILLIS: u64 = 24 * 60 * MINUTE_MILLIS;

/// Length of an account age witness hash (RIPEMD160-sized)
pub const WITNESS_HASH_LEN: usize = 20;

/// Errors produced while encoding or validating a payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Payload too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid field value: {field} - {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Date {date} is more than {tolerance_millis}ms ahead of local time {now}")]
    DateOutOfTolerance { date: u64, now: u64, tolerance_millis: u64 },
}

impl From<bincode::Error> for PayloadError {
    fn from(err: bincode::Error) -> Self {
        PayloadError::Encoding(err.to_string())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> PayloadError {
    PayloadError::InvalidField { field, reason: reason.into() }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

fn require_positive(field: &'static str, value: u64) -> Result<(), PayloadError> {
    if value == 0 {
        return Err(invalid(field, "must be positive"));
    }
    Ok(())
}

fn check_size(bytes: &[u8], max: usize) -> Result<(), PayloadError> {
    if bytes.len() > max {
        return Err(PayloadError::TooLarge { size: bytes.len(), max });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Protected family
// ---------------------------------------------------------------------------

/// Kind tag of a protected payload, used to route to its map store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtectedKind {
    Offer,
    DisputeAgent,
    Mailbox,
}

impl ProtectedKind {
    pub const ALL: [ProtectedKind; 3] =
        [ProtectedKind::Offer, ProtectedKind::DisputeAgent, ProtectedKind::Mailbox];

    /// Slot in fixed per-kind tables
    pub fn index(&self) -> usize {
        match self {
            ProtectedKind::Offer => 0,
            ProtectedKind::DisputeAgent => 1,
            ProtectedKind::Mailbox => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectedKind::Offer => "offer",
            ProtectedKind::DisputeAgent => "dispute_agent",
            ProtectedKind::Mailbox => "mailbox",
        }
    }

    /// Time to live declared by the kind
    pub fn default_ttl(&self) -> Duration {
        match self {
            ProtectedKind::Offer => Duration::from_millis(9 * MINUTE_MILLIS),
            ProtectedKind::DisputeAgent => Duration::from_millis(10 * DAY_MILLIS),
            ProtectedKind::Mailbox => Duration::from_millis(15 * DAY_MILLIS),
        }
    }

    /// Add-once kinds can never come back once removed
    pub fn is_add_once(&self) -> bool {
        matches!(self, ProtectedKind::Mailbox)
    }
}

impl fmt::Display for ProtectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferDirection {
    Buy,
    Sell,
}

/// An open trade offer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferPayload {
    pub id: String,
    pub owner_pub_key: OwnerKey,
    pub direction: OfferDirection,
    pub currency_code: String,
    /// Price in the smallest unit of the counter currency
    pub price: u64,
    pub amount: u64,
    pub min_amount: u64,
    pub payment_method: String,
    pub date: u64,
}

impl OfferPayload {
    fn validate_fields(&self) -> Result<(), PayloadError> {
        require_non_empty("id", &self.id)?;
        require_non_empty("currency_code", &self.currency_code)?;
        require_non_empty("payment_method", &self.payment_method)?;
        require_positive("price", self.price)?;
        require_positive("amount", self.amount)?;
        require_positive("min_amount", self.min_amount)?;
        if self.min_amount > self.amount {
            return Err(invalid(
                "min_amount",
                format!("{} exceeds amount {}", self.min_amount, self.amount),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Arbitrator,
    Mediator,
    RefundAgent,
}

impl AgentRole {
    fn required_capability(&self) -> Capability {
        match self {
            AgentRole::Arbitrator => Capability::Arbitration,
            AgentRole::Mediator => Capability::Mediation,
            AgentRole::RefundAgent => Capability::RefundAgent,
        }
    }
}

/// Registration of a dispute resolution agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisputeAgentPayload {
    pub role: AgentRole,
    pub node_address: String,
    pub owner_pub_key: OwnerKey,
    pub languages: Vec<String>,
    pub registration_date: u64,
    pub contact: Option<String>,
}

impl DisputeAgentPayload {
    fn validate_fields(&self) -> Result<(), PayloadError> {
        require_non_empty("node_address", &self.node_address)?;
        if self.languages.is_empty() {
            return Err(invalid("languages", "at least one language is required"));
        }
        for language in &self.languages {
            require_non_empty("languages", language)?;
        }
        Ok(())
    }
}

/// Sealed message addressed to a single receiver
///
/// The receiver is part of the signed bytes and the storage key, so a relay
/// can't readdress a message to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxPayload {
    pub uid: String,
    pub sender_pub_key: OwnerKey,
    /// The only key allowed to remove the message
    pub receiver_pub_key: OwnerKey,
    /// Ciphertext, opaque to the storage layer
    pub sealed_message: Vec<u8>,
}

impl MailboxPayload {
    fn validate_fields(&self) -> Result<(), PayloadError> {
        require_non_empty("uid", &self.uid)?;
        if self.sealed_message.is_empty() {
            return Err(invalid("sealed_message", "must not be empty"));
        }
        Ok(())
    }
}

/// Mutable-by-owner payload wrapped in a protected storage entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectedPayload {
    Offer(OfferPayload),
    DisputeAgent(DisputeAgentPayload),
    Mailbox(MailboxPayload),
}

impl ProtectedPayload {
    pub fn kind(&self) -> ProtectedKind {
        match self {
            ProtectedPayload::Offer(_) => ProtectedKind::Offer,
            ProtectedPayload::DisputeAgent(_) => ProtectedKind::DisputeAgent,
            ProtectedPayload::Mailbox(_) => ProtectedKind::Mailbox,
        }
    }

    /// Key of the peer allowed to publish this payload (the sender for mailbox messages)
    pub fn owner_pub_key(&self) -> OwnerKey {
        match self {
            ProtectedPayload::Offer(offer) => offer.owner_pub_key,
            ProtectedPayload::DisputeAgent(agent) => agent.owner_pub_key,
            ProtectedPayload::Mailbox(mailbox) => mailbox.sender_pub_key,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.kind().default_ttl()
    }

    pub fn is_add_once(&self) -> bool {
        self.kind().is_add_once()
    }

    pub fn required_capabilities(&self) -> Capabilities {
        match self {
            ProtectedPayload::DisputeAgent(agent) => agent.role.required_capability().into(),
            ProtectedPayload::Mailbox(_) => Capability::Mailbox.into(),
            ProtectedPayload::Offer(_) => Capabilities::new(),
        }
    }

    /// Canonical encoding; the signed byte range and the hash input
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(bincode::serialize(self)?)
    }

    /// Map key of this payload
    pub fn hash(&self) -> Result<StorageKey, PayloadError> {
        Ok(StorageKey::hash(&self.encode()?))
    }

    /// Structural validation plus the encoded size limit
    pub fn validate(&self, max_size: usize) -> Result<(), PayloadError> {
        match self {
            ProtectedPayload::Offer(offer) => offer.validate_fields()?,
            ProtectedPayload::DisputeAgent(agent) => agent.validate_fields()?,
            ProtectedPayload::Mailbox(mailbox) => mailbox.validate_fields()?,
        }
        check_size(&self.encode()?, max_size)
    }
}

// ---------------------------------------------------------------------------
// Persistable family
// ---------------------------------------------------------------------------

/// Kind tag of a persistable payload, used to route to its historical store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PersistableKind {
    TradeStatistics,
    AccountAgeWitness,
    SignedWitness,
}

impl PersistableKind {
    pub const ALL: [PersistableKind; 3] = [
        PersistableKind::TradeStatistics,
        PersistableKind::AccountAgeWitness,
        PersistableKind::SignedWitness,
    ];

    pub fn index(&self) -> usize {
        match self {
            PersistableKind::TradeStatistics => 0,
            PersistableKind::AccountAgeWitness => 1,
            PersistableKind::SignedWitness => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PersistableKind::TradeStatistics => "trade_statistics",
            PersistableKind::AccountAgeWitness => "account_age_witness",
            PersistableKind::SignedWitness => "signed_witness",
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            PersistableKind::TradeStatistics => Capability::TradeStatistics,
            PersistableKind::AccountAgeWitness => Capability::AccountAgeWitness,
            PersistableKind::SignedWitness => Capability::SignedAccountAgeWitness,
        }
    }
}

impl fmt::Display for PersistableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed trade
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeStatisticsPayload {
    pub currency_code: String,
    pub price: u64,
    pub amount: u64,
    pub payment_method: String,
    /// Trade date in milliseconds since the epoch
    pub date: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAgeWitnessPayload {
    pub hash: Vec<u8>,
    pub date: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedWitnessPayload {
    pub account_age_witness_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub signer_pub_key: OwnerKey,
    pub witness_owner_pub_key: OwnerKey,
    pub trade_amount: u64,
    pub date: u64,
}

/// Immutable payload keyed by the hash of its bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistablePayload {
    TradeStatistics(TradeStatisticsPayload),
    AccountAgeWitness(AccountAgeWitnessPayload),
    SignedWitness(SignedWitnessPayload),
}

impl PersistablePayload {
    pub fn kind(&self) -> PersistableKind {
        match self {
            PersistablePayload::TradeStatistics(_) => PersistableKind::TradeStatistics,
            PersistablePayload::AccountAgeWitness(_) => PersistableKind::AccountAgeWitness,
            PersistablePayload::SignedWitness(_) => PersistableKind::SignedWitness,
        }
    }

    pub fn required_capabilities(&self) -> Capabilities {
        self.kind().required_capability().into()
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(bincode::serialize(self)?)
    }

    /// Content address: a pure function of the encoded bytes
    pub fn hash(&self) -> Result<StorageKey, PayloadError> {
        Ok(StorageKey::hash(&self.encode()?))
    }

    pub fn validate(&self, max_size: usize) -> Result<(), PayloadError> {
        match self {
            PersistablePayload::TradeStatistics(stats) => {
                require_non_empty("currency_code", &stats.currency_code)?;
                require_non_empty("payment_method", &stats.payment_method)?;
                require_positive("price", stats.price)?;
                require_positive("amount", stats.amount)?;
            }
            PersistablePayload::AccountAgeWitness(witness) => {
                if witness.hash.len() != WITNESS_HASH_LEN {
                    return Err(invalid(
                        "hash",
                        format!("expected {} bytes, got {}", WITNESS_HASH_LEN, witness.hash.len()),
                    ));
                }
            }
            PersistablePayload::SignedWitness(witness) => {
                if witness.account_age_witness_hash.len() != WITNESS_HASH_LEN {
                    return Err(invalid(
                        "account_age_witness_hash",
                        format!(
                            "expected {} bytes, got {}",
                            WITNESS_HASH_LEN,
                            witness.account_age_witness_hash.len()
                        ),
                    ));
                }
                if witness.signature.is_empty() {
                    return Err(invalid("signature", "must not be empty"));
                }
            }
        }
        check_size(&self.encode()?, max_size)
    }

    /// Reject trade statistics dated too far in the future.
    /// Other kinds carry no date worth checking.
    pub fn check_date(&self, now: u64, tolerance: Duration) -> Result<(), PayloadError> {
        if let PersistablePayload::TradeStatistics(stats) = self {
            let tolerance_millis = tolerance.as_millis() as u64;
            if stats.date > now.saturating_add(tolerance_millis) {
                return Err(PayloadError::DateOutOfTolerance {
                    date: stats.date,
                    now,
                    tolerance_millis,
                });
            }
        }
        Ok(())
    }
}
