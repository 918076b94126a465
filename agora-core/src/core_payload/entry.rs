/*
    Entry - signed, sequenced wrappers around protected payloads

    Responsibilities:
    `entry.rs` holds the value objects that travel through add/remove/refresh.
    A protected storage entry binds a payload to its owner key, a sequence number
    and a signature over hash(payload bytes || sequence number). Mailbox payloads
    name their receiver inside the signed bytes; only that key may remove them.

    Inputs:
    - protected payloads, keypairs, local clock readings

    Outputs:
    - self-verifying entries and refresh records
    - expiry / ownership predicates used by the storage engine

    Notes:
    - nothing here performs I/O
    - the creation timestamp is local; it is not part of the signed bytes
*/

use super::keys::{EntrySignature, Keypair, OwnerKey};
use super::payload::{MailboxPayload, PayloadError, ProtectedKind, ProtectedPayload};
use super::storage_key::StorageKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hash over `payload_bytes || sequence_number` that owners sign
pub fn data_and_seq_hash(payload_bytes: &[u8], sequence_number: u64) -> StorageKey {
    StorageKey::hash_parts(&[payload_bytes, &sequence_number.to_be_bytes()])
}

/// A protected payload plus the proof that its owner published it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedStorageEntry {
    pub payload: ProtectedPayload,
    pub owner_pub_key: OwnerKey,
    pub sequence_number: u64,
    pub signature: EntrySignature,
    /// Local receive/creation time in milliseconds
    pub creation_timestamp: u64,
}

impl ProtectedStorageEntry {
    /// Build and sign an entry with `keypair` as owner
    pub fn sign(
        payload: ProtectedPayload,
        sequence_number: u64,
        keypair: &Keypair,
        now: u64,
    ) -> Result<Self, PayloadError> {
        let bytes = payload.encode()?;
        let digest = data_and_seq_hash(&bytes, sequence_number);

        Ok(ProtectedStorageEntry {
            payload,
            owner_pub_key: keypair.public_key(),
            sequence_number,
            signature: keypair.sign(digest.as_bytes()),
            creation_timestamp: now,
        })
    }

    pub fn key(&self) -> Result<StorageKey, PayloadError> {
        self.payload.hash()
    }

    pub fn kind(&self) -> ProtectedKind {
        self.payload.kind()
    }

    /// Recompute the signed byte range and check it against `owner_pub_key`
    pub fn verify_signature(&self) -> bool {
        let bytes = match self.payload.encode() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let digest = data_and_seq_hash(&bytes, self.sequence_number);
        self.owner_pub_key.verify(digest.as_bytes(), &self.signature)
    }

    /// Expired once strictly more than the kind's TTL has passed since creation
    pub fn is_expired(&self, now: u64) -> bool {
        self.is_expired_after(now, self.payload.ttl())
    }

    /// Same as [`is_expired`](Self::is_expired) with an explicit TTL
    pub fn is_expired_after(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.creation_timestamp) > ttl.as_millis() as u64
    }

    pub fn matches_owner(&self, candidate: &OwnerKey) -> bool {
        self.owner_pub_key == *candidate
    }

    /// Clamp a creation time lying in our future so a peer's clock can't extend the TTL
    pub fn maybe_adjust_creation_timestamp(&mut self, now: u64) {
        if self.creation_timestamp > now {
            self.creation_timestamp = now;
        }
    }

    /// Bump sequence number and signature from a verified refresh and restart the TTL
    pub fn apply_refresh(&mut self, refresh: &RefreshOfferMessage, now: u64) {
        self.sequence_number = refresh.sequence_number;
        self.signature = refresh.signature.clone();
        self.creation_timestamp = now;
    }

    /// Equality ignoring the local creation timestamp
    pub fn same_content(&self, other: &ProtectedStorageEntry) -> bool {
        self.payload == other.payload
            && self.owner_pub_key == other.owner_pub_key
            && self.sequence_number == other.sequence_number
            && self.signature == other.signature
    }
}

/// A protected entry carrying a mailbox payload for one receiver
///
/// The receiver is read from the signed payload; nothing outside the signature
/// decides who may remove the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedMailboxStorageEntry {
    pub entry: ProtectedStorageEntry,
}

impl ProtectedMailboxStorageEntry {
    /// Sender-signed entry used to deposit a message
    pub fn for_receiver(
        payload: MailboxPayload,
        sequence_number: u64,
        sender: &Keypair,
        now: u64,
    ) -> Result<Self, PayloadError> {
        let entry =
            ProtectedStorageEntry::sign(ProtectedPayload::Mailbox(payload), sequence_number, sender, now)?;
        Ok(ProtectedMailboxStorageEntry { entry })
    }

    /// Receiver-signed entry used to remove a consumed message
    pub fn removal(
        payload: MailboxPayload,
        sequence_number: u64,
        receiver: &Keypair,
        now: u64,
    ) -> Result<Self, PayloadError> {
        let entry = ProtectedStorageEntry::sign(
            ProtectedPayload::Mailbox(payload),
            sequence_number,
            receiver,
            now,
        )?;
        Ok(ProtectedMailboxStorageEntry { entry })
    }

    /// Receiver named in the signed payload
    pub fn receiver_pub_key(&self) -> Option<OwnerKey> {
        match &self.entry.payload {
            ProtectedPayload::Mailbox(mailbox) => Some(mailbox.receiver_pub_key),
            _ => None,
        }
    }
}

/// Any entry that can live in a protected map store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageEntry {
    Protected(ProtectedStorageEntry),
    Mailbox(ProtectedMailboxStorageEntry),
}

impl StorageEntry {
    pub fn protected_entry(&self) -> &ProtectedStorageEntry {
        match self {
            StorageEntry::Protected(entry) => entry,
            StorageEntry::Mailbox(mailbox) => &mailbox.entry,
        }
    }

    pub fn protected_entry_mut(&mut self) -> &mut ProtectedStorageEntry {
        match self {
            StorageEntry::Protected(entry) => entry,
            StorageEntry::Mailbox(mailbox) => &mut mailbox.entry,
        }
    }

    pub fn key(&self) -> Result<StorageKey, PayloadError> {
        self.protected_entry().key()
    }

    pub fn kind(&self) -> ProtectedKind {
        self.protected_entry().kind()
    }

    pub fn sequence_number(&self) -> u64 {
        self.protected_entry().sequence_number
    }

    pub fn receiver_pub_key(&self) -> Option<OwnerKey> {
        match self {
            StorageEntry::Protected(_) => None,
            StorageEntry::Mailbox(mailbox) => mailbox.receiver_pub_key(),
        }
    }

    /// Mailbox payloads travel in mailbox entries and nothing else does
    pub fn validate_shape(&self) -> Result<(), PayloadError> {
        let is_mailbox_payload = self.kind() == ProtectedKind::Mailbox;
        let is_mailbox_entry = matches!(self, StorageEntry::Mailbox(_));
        if is_mailbox_payload != is_mailbox_entry {
            return Err(PayloadError::InvalidField {
                field: "entry",
                reason: format!("{} payload in the wrong entry variant", self.kind()),
            });
        }
        Ok(())
    }

    /// On add the signer must be the key named inside the payload
    pub fn add_signer_matches_payload(&self) -> bool {
        let entry = self.protected_entry();
        entry.matches_owner(&entry.payload.owner_pub_key())
    }

    /// On remove the signer must be the payload owner, or the receiver for mailbox entries
    pub fn removal_signer_matches_payload(&self) -> bool {
        match self {
            StorageEntry::Protected(entry) => entry.matches_owner(&entry.payload.owner_pub_key()),
            StorageEntry::Mailbox(mailbox) => mailbox
                .receiver_pub_key()
                .is_some_and(|receiver| mailbox.entry.matches_owner(&receiver)),
        }
    }

    /// Whether this removal request may delete `stored`
    pub fn may_remove(&self, stored: &StorageEntry) -> bool {
        match (self, stored) {
            (StorageEntry::Protected(removal), StorageEntry::Protected(stored)) => {
                removal.matches_owner(&stored.owner_pub_key)
            }
            (StorageEntry::Mailbox(removal), StorageEntry::Mailbox(stored)) => stored
                .receiver_pub_key()
                .is_some_and(|receiver| removal.entry.matches_owner(&receiver)),
            _ => false,
        }
    }

    pub fn same_content(&self, other: &StorageEntry) -> bool {
        self.protected_entry().same_content(other.protected_entry())
    }
}

impl From<ProtectedStorageEntry> for StorageEntry {
    fn from(entry: ProtectedStorageEntry) -> Self {
        StorageEntry::Protected(entry)
    }
}

impl From<ProtectedMailboxStorageEntry> for StorageEntry {
    fn from(entry: ProtectedMailboxStorageEntry) -> Self {
        StorageEntry::Mailbox(entry)
    }
}

/// Lightweight TTL bump for an entry the receiver already holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOfferMessage {
    pub hash_of_payload: StorageKey,
    pub hash_of_data_and_seq_nr: StorageKey,
    pub signature: EntrySignature,
    pub sequence_number: u64,
}

impl RefreshOfferMessage {
    pub fn sign(
        payload: &ProtectedPayload,
        sequence_number: u64,
        keypair: &Keypair,
    ) -> Result<Self, PayloadError> {
        let bytes = payload.encode()?;
        let digest = data_and_seq_hash(&bytes, sequence_number);

        Ok(RefreshOfferMessage {
            hash_of_payload: StorageKey::hash(&bytes),
            hash_of_data_and_seq_nr: digest,
            signature: keypair.sign(digest.as_bytes()),
            sequence_number,
        })
    }

    /// Check the refresh against the stored payload bytes and its owner
    pub fn verify_against(&self, payload_bytes: &[u8], owner: &OwnerKey) -> bool {
        let digest = data_and_seq_hash(payload_bytes, self.sequence_number);
        digest == self.hash_of_data_and_seq_nr && owner.verify(digest.as_bytes(), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_payload::payload::{OfferDirection, OfferPayload};

    fn offer_for(keypair: &Keypair) -> ProtectedPayload {
        ProtectedPayload::Offer(OfferPayload {
            id: "offer-7".to_string(),
            owner_pub_key: keypair.public_key(),
            direction: OfferDirection::Buy,
            currency_code: "EUR".to_string(),
            price: 100,
            amount: 10,
            min_amount: 5,
            payment_method: "SEPA".to_string(),
            date: 0,
        })
    }

    fn mailbox_from(sender: &Keypair, receiver: &Keypair) -> MailboxPayload {
        MailboxPayload {
            uid: "msg-1".to_string(),
            sender_pub_key: sender.public_key(),
            receiver_pub_key: receiver.public_key(),
            sealed_message: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_signed_entry_verifies() {
        let owner = Keypair::from_seed([1u8; 32]);
        let entry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 0).unwrap();

        assert!(entry.verify_signature());
        assert!(entry.matches_owner(&owner.public_key()));
    }

    #[test]
    fn test_changing_sequence_number_breaks_signature() {
        let owner = Keypair::from_seed([1u8; 32]);
        let mut entry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 0).unwrap();
        entry.sequence_number = 2;

        assert!(!entry.verify_signature());
    }

    #[test]
    fn test_creation_timestamp_not_signed() {
        let owner = Keypair::from_seed([1u8; 32]);
        let mut entry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 0).unwrap();
        entry.creation_timestamp = 12345;

        assert!(entry.verify_signature());
    }

    #[test]
    fn test_expiry_is_strict() {
        let owner = Keypair::from_seed([1u8; 32]);
        let entry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 1_000).unwrap();
        let ttl = Duration::from_secs(60);

        assert!(!entry.is_expired_after(61_000, ttl));
        assert!(entry.is_expired_after(61_001, ttl));
        assert!(!entry.is_expired(1_000 + 9 * 60 * 1000));
    }

    #[test]
    fn test_future_timestamp_clamped() {
        let owner = Keypair::from_seed([1u8; 32]);
        let mut entry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 50_000).unwrap();

        entry.maybe_adjust_creation_timestamp(10_000);
        assert_eq!(entry.creation_timestamp, 10_000);

        entry.maybe_adjust_creation_timestamp(20_000);
        assert_eq!(entry.creation_timestamp, 10_000);
    }

    #[test]
    fn test_refresh_verifies_against_owner() {
        let owner = Keypair::from_seed([1u8; 32]);
        let intruder = Keypair::from_seed([2u8; 32]);
        let payload = offer_for(&owner);
        let bytes = payload.encode().unwrap();

        let refresh = RefreshOfferMessage::sign(&payload, 2, &owner).unwrap();
        assert_eq!(refresh.hash_of_payload, payload.hash().unwrap());
        assert!(refresh.verify_against(&bytes, &owner.public_key()));

        let forged = RefreshOfferMessage::sign(&payload, 2, &intruder).unwrap();
        assert!(!forged.verify_against(&bytes, &owner.public_key()));
    }

    #[test]
    fn test_apply_refresh_renews_entry() {
        let owner = Keypair::from_seed([1u8; 32]);
        let payload = offer_for(&owner);
        let mut entry = ProtectedStorageEntry::sign(payload.clone(), 1, &owner, 0).unwrap();

        let refresh = RefreshOfferMessage::sign(&payload, 2, &owner).unwrap();
        entry.apply_refresh(&refresh, 30_000);

        assert_eq!(entry.sequence_number, 2);
        assert_eq!(entry.creation_timestamp, 30_000);
        assert!(entry.verify_signature());
    }

    #[test]
    fn test_entry_shape() {
        let sender = Keypair::from_seed([3u8; 32]);
        let receiver = Keypair::from_seed([4u8; 32]);

        let mailbox: StorageEntry =
            ProtectedMailboxStorageEntry::for_receiver(mailbox_from(&sender, &receiver), 1, &sender, 0)
                .unwrap()
                .into();
        assert!(mailbox.validate_shape().is_ok());

        let misplaced: StorageEntry = ProtectedStorageEntry::sign(
            ProtectedPayload::Mailbox(mailbox_from(&sender, &receiver)),
            1,
            &sender,
            0,
        )
        .unwrap()
        .into();
        assert!(misplaced.validate_shape().is_err());
    }

    #[test]
    fn test_only_receiver_may_remove_mailbox_entry() {
        let sender = Keypair::from_seed([3u8; 32]);
        let receiver = Keypair::from_seed([4u8; 32]);
        let payload = mailbox_from(&sender, &receiver);
        let stored: StorageEntry =
            ProtectedMailboxStorageEntry::for_receiver(payload.clone(), 1, &sender, 0)
                .unwrap()
                .into();
        assert!(stored.add_signer_matches_payload());
        assert_eq!(stored.receiver_pub_key(), Some(receiver.public_key()));

        let by_receiver: StorageEntry =
            ProtectedMailboxStorageEntry::removal(payload.clone(), 2, &receiver, 0).unwrap().into();
        assert!(by_receiver.removal_signer_matches_payload());
        assert!(by_receiver.may_remove(&stored));

        let by_sender: StorageEntry =
            ProtectedMailboxStorageEntry::removal(payload, 2, &sender, 0).unwrap().into();
        assert!(!by_sender.removal_signer_matches_payload());
        assert!(!by_sender.may_remove(&stored));
    }

    #[test]
    fn test_readdressed_mailbox_entry_fails_verification() {
        let sender = Keypair::from_seed([3u8; 32]);
        let receiver = Keypair::from_seed([4u8; 32]);
        let relay = Keypair::from_seed([5u8; 32]);
        let mut entry =
            ProtectedMailboxStorageEntry::for_receiver(mailbox_from(&sender, &receiver), 1, &sender, 0)
                .unwrap();

        if let ProtectedPayload::Mailbox(mailbox) = &mut entry.entry.payload {
            mailbox.receiver_pub_key = relay.public_key();
        }

        assert!(!entry.entry.verify_signature());
    }

    #[test]
    fn test_same_content_ignores_timestamp() {
        let owner = Keypair::from_seed([1u8; 32]);
        let a: StorageEntry = ProtectedStorageEntry::sign(offer_for(&owner), 1, &owner, 0).unwrap().into();
        let mut b = a.clone();
        b.protected_entry_mut().creation_timestamp = 999;

        assert!(a.same_content(&b));
    }
}
