//! Core types for Palisade consensus.
//!
//! This crate provides the foundational types used by the vote accounting
//! core:
//!
//! - **Primitives**: [`Hash`], Ed25519 keys and signatures
//! - **Validators**: [`Validator`], [`ValidatorSet`], weighted power helpers
//! - **Votes**: [`Vote`], [`VoteKind`], [`BlockId`], [`PartSetHeader`]
//! - **Signing**: [`ChainId`] and the canonical vote sign bytes
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod bitfield;
mod crypto;
mod hash;
mod signing;
mod validator;
mod vote;

pub use bitfield::SignerBitfield;
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::Hash;
pub use signing::{vote_sign_bytes, ChainId, DOMAIN_VOTE};
pub use validator::{supermajority, Address, Validator, ValidatorSet};
pub use vote::{BlockId, PartSetHeader, Vote, VoteKind};
