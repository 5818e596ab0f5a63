//! Structured signals for the layer above the vote core.

use palisade_types::VoteKind;
use std::fmt;

/// Identifier of the peer a vote arrived from.
///
/// The empty identifier denotes the local validator by convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a peer identifier string.
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    /// The local validator's identifier.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// Whether this is the local validator.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            f.write_str("<local>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A peer asked for a second catch-up round and was refused.
///
/// The core only reports. Whether to deprioritize or disconnect the peer
/// is policy for the reactor above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchupThrottled {
    /// Height the refused vote targeted.
    pub height: u64,
    /// The offending peer.
    pub peer: PeerId,
    /// The catch-up round already granted to this peer.
    pub admitted_round: u32,
    /// The further round the refused vote asked for.
    pub rejected_round: u32,
    /// Kind of the refused vote.
    pub kind: VoteKind,
}

/// Receives structured events from the vote accounting core.
pub trait VoteObserver: Send + Sync {
    /// A peer exceeded its one-catch-up-round allowance.
    fn catchup_throttled(&self, event: CatchupThrottled);
}
