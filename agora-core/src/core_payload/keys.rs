//! Owner keys and signatures
//!
//! Every protected entry names the Ed25519 key of the peer allowed to mutate it.
//! Signing uses real cryptography (ed25519-dalek); the secret half never leaves
//! the [`Keypair`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ed25519 public key of an entry owner (or of a mailbox receiver)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey([u8; 32]);

impl OwnerKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        OwnerKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify `signature` over `msg`.
    /// Returns false for malformed keys or signatures instead of erroring.
    pub fn verify(&self, msg: &[u8], signature: &EntrySignature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.0) {
            Ok(vk) => vk,
            Err(_) => return false,
        };

        let signature = match Signature::from_slice(signature.as_bytes()) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        verifying_key.verify(msg, &signature).is_ok()
    }
}

impl fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerKey({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Detached Ed25519 signature (64 bytes when well formed)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntrySignature(Vec<u8>);

impl EntrySignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        EntrySignature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EntrySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "EntrySignature({}..)", hex::encode(prefix))
    }
}

/// Signing keypair held by a publishing peer
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the thread RNG
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed);
        Self::from_seed(seed)
    }

    /// Rebuild a keypair from its 32-byte secret seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Keypair { signing_key: SigningKey::from_bytes(&seed) }
    }

    pub fn public_key(&self) -> OwnerKey {
        OwnerKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> EntrySignature {
        EntrySignature(self.signing_key.sign(msg).to_bytes().to_vec())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}
