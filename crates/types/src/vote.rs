//! Votes and the block identifiers they tally under.

use crate::{vote_sign_bytes, ChainId, Hash, KeyPair, Signature};
use std::fmt;

/// The two vote kinds of the two-phase commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    /// First-phase vote: the voter considers the block valid for this round.
    Prevote,
    /// Second-phase vote: the voter is prepared to commit the block.
    Precommit,
}

impl VoteKind {
    /// Stable single-byte tag used in sign bytes.
    pub(crate) fn tag(self) -> u8 {
        match self {
            VoteKind::Prevote => 1,
            VoteKind::Precommit => 2,
        }
    }

    /// Short name for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Prevote => "Prevote",
            VoteKind::Precommit => "Precommit",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-addressed description of a block's chunking.
///
/// Two headers are equal iff both fields match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartSetHeader {
    /// Number of parts the block was split into.
    pub total: u32,
    /// Merkle root over the parts.
    pub hash: Hash,
}

impl PartSetHeader {
    /// Header for a real block.
    pub const fn new(total: u32, hash: Hash) -> Self {
        Self { total, hash }
    }

    /// The header carried by nil votes.
    pub const fn empty() -> Self {
        Self {
            total: 0,
            hash: Hash::ZERO,
        }
    }

    /// Whether this is the nil-vote header.
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.hash == Hash::ZERO
    }
}

/// The identifier votes tally under: a block hash plus its part-set
/// header, or nil (a vote for no block).
///
/// `Eq`/`Hash` are derived, so tallies can key on the identifier directly;
/// equal identifiers also encode identically via [`BlockId::encode_into`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    /// Hash of the proposed block, or `None` for a nil vote.
    pub hash: Option<Hash>,
    /// Part-set header of the proposed block; empty for a nil vote.
    pub parts: PartSetHeader,
}

impl BlockId {
    /// Identifier for a proposed block.
    pub const fn new(hash: Hash, parts: PartSetHeader) -> Self {
        Self {
            hash: Some(hash),
            parts,
        }
    }

    /// The nil identifier: a vote against any proposed block.
    pub const fn nil() -> Self {
        Self {
            hash: None,
            parts: PartSetHeader::empty(),
        }
    }

    /// Whether this is the nil identifier.
    pub fn is_nil(&self) -> bool {
        self.hash.is_none()
    }

    /// Append the canonical encoding of this identifier.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match &self.hash {
            Some(hash) => {
                out.push(1);
                out.extend_from_slice(hash.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.parts.total.to_be_bytes());
        out.extend_from_slice(self.parts.hash.as_bytes());
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{:?}#{}", hash, self.parts.total),
            None => f.write_str("nil"),
        }
    }
}

/// A signed vote by one validator about one block at `(height, round, kind)`.
///
/// Immutable once created. The signer is not stored in the vote; it is
/// identified by index or address at add time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Height of the consensus instance this vote belongs to.
    pub height: u64,
    /// Round within the height.
    pub round: u32,
    /// Prevote or precommit.
    pub kind: VoteKind,
    /// The block identifier voted for, or nil.
    pub block_id: BlockId,
    /// Signature over the canonical sign bytes.
    pub signature: Signature,
}

impl Vote {
    /// Create a correctly signed vote.
    pub fn sign(
        chain_id: &ChainId,
        height: u64,
        round: u32,
        kind: VoteKind,
        block_id: BlockId,
        key: &KeyPair,
    ) -> Self {
        let message = vote_sign_bytes(chain_id, height, round, kind, &block_id);
        Self {
            height,
            round,
            kind,
            block_id,
            signature: key.sign(&message),
        }
    }

    /// Recompute the canonical pre-image this vote's signature covers.
    pub fn sign_bytes(&self, chain_id: &ChainId) -> Vec<u8> {
        vote_sign_bytes(chain_id, self.height, self.round, self.kind, &self.block_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_set_header_equality() {
        let a = PartSetHeader::new(3, Hash::digest(b"parts"));
        let b = PartSetHeader::new(3, Hash::digest(b"parts"));
        assert_eq!(a, b);

        assert_ne!(a, PartSetHeader::new(4, Hash::digest(b"parts")));
        assert_ne!(a, PartSetHeader::new(3, Hash::digest(b"other")));
        assert!(PartSetHeader::empty().is_empty());
        assert!(!a.is_empty());
    }

    #[test]
    fn test_block_id_encoding_distinguishes_nil() {
        let block = BlockId::new(Hash::ZERO, PartSetHeader::empty());
        let nil = BlockId::nil();
        assert_ne!(block, nil);

        let mut block_bytes = Vec::new();
        block.encode_into(&mut block_bytes);
        let mut nil_bytes = Vec::new();
        nil.encode_into(&mut nil_bytes);
        assert_ne!(block_bytes, nil_bytes);
    }

    #[test]
    fn test_equal_ids_encode_identically() {
        let a = BlockId::new(Hash::digest(b"block"), PartSetHeader::new(2, Hash::digest(b"p")));
        let b = BlockId::new(Hash::digest(b"block"), PartSetHeader::new(2, Hash::digest(b"p")));

        let mut a_bytes = Vec::new();
        a.encode_into(&mut a_bytes);
        let mut b_bytes = Vec::new();
        b.encode_into(&mut b_bytes);
        assert_eq!(a_bytes, b_bytes);
    }

    #[test]
    fn test_signed_vote_verifies() {
        let chain = ChainId::new("test-chain");
        let key = crate::KeyPair::from_seed([5u8; 32]);
        let block_id = BlockId::new(Hash::digest(b"block"), PartSetHeader::new(1, Hash::ZERO));

        let vote = Vote::sign(&chain, 1, 0, VoteKind::Prevote, block_id, &key);
        assert!(key
            .public_key()
            .verify(&vote.sign_bytes(&chain), &vote.signature));

        // A different chain id changes the pre-image.
        let other = ChainId::new("other-chain");
        assert!(!key
            .public_key()
            .verify(&vote.sign_bytes(&other), &vote.signature));
    }
}
