//! Vote accounting for Palisade consensus.
//!
//! This crate implements the substrate the consensus state machine builds
//! on: collecting signed votes from a weighted validator set and reporting
//! when strictly more than two thirds of total voting power agrees on one
//! block identifier.
//!
//! - [`VoteSet`] collects votes for one `(height, round, kind)`: at most
//!   one vote per validator, signature-verified, weight-tallied per block
//!   identifier, with the first +2/3 identifier latched permanently.
//! - [`HeightVoteSet`] owns the vote sets of one height across rounds,
//!   admits new rounds as consensus advances, and throttles peers that
//!   refer to rounds beyond the current one.
//!
//! # Terminology
//!
//! - **Height**: position of a block in the chain; one consensus instance.
//! - **Round**: a numbered attempt to commit a block at a height; rounds
//!   only advance within a height.
//! - **+2/3**: strictly more than two thirds of total voting power, the
//!   BFT safety threshold.
//! - **POL round**: the highest round at or below the current one with a
//!   +2/3 prevote majority, used by the state machine to justify locks.
//!
//! # Concurrency
//!
//! Every public method is safe to call from multiple threads: the
//! consensus main loop and per-peer receive loops share these structures
//! directly. Locking is one mutex per structure, ordered container before
//! leaf. All operations are short, synchronous, and CPU-bound.

mod error;
mod height_vote_set;
mod observer;
mod vote_set;

pub use error::{AddOutcome, VoteError};
pub use height_vote_set::{HeightVoteSet, RoundVoteSet};
pub use observer::{CatchupThrottled, PeerId, VoteObserver};
pub use vote_set::{Validation, VoteSet};
