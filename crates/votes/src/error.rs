//! Error taxonomy for vote accounting.

use palisade_types::Vote;
use thiserror::Error;

/// Why a vote was rejected.
///
/// Every variant is local to the rejected vote: the aggregator state is
/// unchanged, and no retry will help without different input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    /// The vote's `(height, round, kind)` does not match the target set.
    #[error("vote does not match the set's height, round, and kind")]
    UnexpectedStep,

    /// The signer is not a member of the validator set.
    #[error("signer is not a validator")]
    InvalidAccount,

    /// The signature does not verify against the signer's public key.
    #[error("invalid vote signature")]
    InvalidSignature,

    /// Reserved for block hash validation in the layer above.
    #[error("invalid block hash")]
    InvalidBlockHash,

    /// The signer already voted for a different block in this set.
    ///
    /// Both votes are carried for evidence assembly. The prior vote stays
    /// in its slot; the conflicting one is not stored.
    #[error("conflicting votes from one validator")]
    ConflictingSignature {
        /// The vote already held in the validator's slot.
        prior: Box<Vote>,
        /// The rejected vote for a different block.
        conflicting: Box<Vote>,
    },
}

/// What became of a submitted vote that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Accepted and tallied at the given validator index.
    Added {
        /// The voting validator's index.
        index: usize,
    },
    /// The identical vote was already present; no state changed.
    Duplicate {
        /// The voting validator's index.
        index: usize,
    },
    /// Dropped by the per-peer catch-up throttle; no state changed.
    Throttled,
}

impl AddOutcome {
    /// Whether the vote was newly accepted.
    pub fn is_added(&self) -> bool {
        matches!(self, AddOutcome::Added { .. })
    }
}
