/*
    Capability - feature flags announced by peers and required by payloads

    A payload kind may require capabilities; a peer announces the set it supports
    at handshake time. The capability gate compares the two before relaying data
    to a peer so old clients never receive data they cannot parse.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single protocol feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Understands trade statistics records
    TradeStatistics,
    /// Understands account age witnesses
    AccountAgeWitness,
    /// Understands signed account age witnesses
    SignedAccountAgeWitness,
    /// Understands mediator registrations
    Mediation,
    /// Understands arbitrator registrations
    Arbitration,
    /// Understands refund agent registrations
    RefundAgent,
    /// Accepts mailbox entries
    Mailbox,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::TradeStatistics,
        Capability::AccountAgeWitness,
        Capability::SignedAccountAgeWitness,
        Capability::Mediation,
        Capability::Arbitration,
        Capability::RefundAgent,
        Capability::Mailbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TradeStatistics => "trade_statistics",
            Capability::AccountAgeWitness => "account_age_witness",
            Capability::SignedAccountAgeWitness => "signed_account_age_witness",
            Capability::Mediation => "mediation",
            Capability::Arbitration => "arbitration",
            Capability::RefundAgent => "refund_agent",
            Capability::Mailbox => "mailbox",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Capabilities(BTreeSet::new())
    }

    /// Every capability this build understands
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// True if every capability in `required` is present
    pub fn contains_all(&self, required: &Capabilities) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Capabilities from `required` that this set lacks
    pub fn missing(&self, required: &Capabilities) -> Vec<Capability> {
        required.0.difference(&self.0).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Capabilities(iter.into_iter().collect())
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        std::iter::once(capability).collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Capability::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
