//! Weighted vote accumulation for one `(height, round, kind)`.

use crate::{AddOutcome, VoteError};
use palisade_types::{
    supermajority, Address, BlockId, ChainId, SignerBitfield, Validator, ValidatorSet, Vote,
    VoteKind,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Collects signed votes from validators at one `(height, round, kind)`.
///
/// Accepts at most one vote per validator, verifies each signature against
/// the validator set, tallies weighted voting power per block identifier,
/// and latches the first identifier whose tally strictly exceeds two
/// thirds of total power. The latch is permanent: once set it never
/// changes, even if a second identifier later crosses the threshold
/// (which cannot happen without a third of total power double-signing).
///
/// All mutable state sits behind a single mutex, so the consensus main
/// loop and per-peer receive loops can share one set directly. Signature
/// verification runs under the lock, which also guarantees that two
/// concurrent adds for the same validator cannot both succeed.
pub struct VoteSet {
    height: u64,
    round: u32,
    kind: VoteKind,
    chain_id: ChainId,
    validators: Arc<ValidatorSet>,
    state: Mutex<VoteSetState>,
}

struct VoteSetState {
    /// Validator index -> accepted vote. Never overwritten once filled.
    votes: Vec<Option<Vote>>,
    /// Presence bitmap mirroring `votes`.
    bitfield: SignerBitfield,
    /// Weighted power per distinct block identifier.
    tally: HashMap<BlockId, u64>,
    /// Power of all accepted votes, nil votes included.
    total_power: u64,
    /// First identifier to cross two thirds. Set at most once.
    maj23: Option<BlockId>,
}

impl VoteSet {
    /// Create an empty vote set.
    ///
    /// Panics on `height == 0`; heights start at one.
    pub fn new(
        height: u64,
        round: u32,
        kind: VoteKind,
        chain_id: ChainId,
        validators: Arc<ValidatorSet>,
    ) -> Self {
        assert!(height > 0, "cannot make a VoteSet for height 0");
        let size = validators.len();
        Self {
            height,
            round,
            kind,
            chain_id,
            validators,
            state: Mutex::new(VoteSetState {
                votes: vec![None; size],
                bitfield: SignerBitfield::new(size),
                tally: HashMap::new(),
                total_power: 0,
                maj23: None,
            }),
        }
    }

    /// Height this set accumulates votes for.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Round this set accumulates votes for.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Kind of votes this set accepts.
    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    /// Number of validators, and so of vote slots.
    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// The validator set votes are verified against.
    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    /// Add a vote signed by the validator at `index`.
    pub fn add_by_index(&self, index: usize, vote: Vote) -> Result<AddOutcome, VoteError> {
        let validator = self
            .validators
            .get_by_index(index)
            .ok_or(VoteError::InvalidAccount)?;
        let mut state = self.state.lock();
        self.add_vote(&mut state, index, validator, vote)
    }

    /// Add a vote signed by the validator with `address`.
    pub fn add_by_address(&self, address: &Address, vote: Vote) -> Result<AddOutcome, VoteError> {
        let (index, validator) = self
            .validators
            .get_by_address(address)
            .ok_or(VoteError::InvalidAccount)?;
        let mut state = self.state.lock();
        self.add_vote(&mut state, index, validator, vote)
    }

    fn add_vote(
        &self,
        state: &mut VoteSetState,
        index: usize,
        validator: &Validator,
        vote: Vote,
    ) -> Result<AddOutcome, VoteError> {
        // Step must match exactly; the container routes by (round, kind)
        // before delegating here.
        if vote.height != self.height || vote.round != self.round || vote.kind != self.kind {
            return Err(VoteError::UnexpectedStep);
        }

        // Verify the signature over the canonical sign bytes.
        let message = vote.sign_bytes(&self.chain_id);
        if !validator.public_key.verify(&message, &vote.signature) {
            return Err(VoteError::InvalidSignature);
        }

        // One slot per validator. A repeat vote for the same block hash is
        // an idempotent duplicate; a different block hash is double-signing
        // and both votes go back to the caller as evidence.
        if let Some(existing) = &state.votes[index] {
            if existing.block_id.hash == vote.block_id.hash {
                return Ok(AddOutcome::Duplicate { index });
            }
            return Err(VoteError::ConflictingSignature {
                prior: Box::new(existing.clone()),
                conflicting: Box::new(vote),
            });
        }

        // Accept and tally.
        let power = validator.voting_power;
        let block_id = vote.block_id;
        state.votes[index] = Some(vote);
        state.bitfield.set(index);
        let tally = state.tally.entry(block_id).or_insert(0);
        *tally += power;
        let new_tally = *tally;
        state.total_power += power;

        // Latch the first identifier to cross two thirds. The crossing
        // check makes the latch a one-time transition rather than a
        // recomputation.
        let total = self.validators.total_voting_power();
        if state.maj23.is_none()
            && supermajority(new_tally, total)
            && !supermajority(new_tally - power, total)
        {
            state.maj23 = Some(block_id);
            debug!(
                height = self.height,
                round = self.round,
                kind = %self.kind,
                block_id = ?block_id,
                power = new_tally,
                total = total,
                "Two-thirds majority latched"
            );
        }

        Ok(AddOutcome::Added { index })
    }

    /// Stored vote of the validator at `index`, if any.
    pub fn get_by_index(&self, index: usize) -> Option<Vote> {
        self.state.lock().votes.get(index).cloned().flatten()
    }

    /// Stored vote of the validator with `address`, if any.
    ///
    /// Panics if the address is not a validator; the add paths are the
    /// ones that accept untrusted input.
    pub fn get_by_address(&self, address: &Address) -> Option<Vote> {
        let (index, _) = self
            .validators
            .get_by_address(address)
            .expect("get_by_address: address is not a validator");
        self.state.lock().votes[index].clone()
    }

    /// Snapshot of the vote presence bitmap.
    pub fn bitfield(&self) -> SignerBitfield {
        self.state.lock().bitfield.clone()
    }

    /// Whether some block identifier holds strictly more than two thirds
    /// of total voting power.
    pub fn has_two_thirds_majority(&self) -> bool {
        self.state.lock().maj23.is_some()
    }

    /// Whether accepted votes together hold strictly more than two thirds
    /// of total voting power, regardless of which blocks they name.
    pub fn has_two_thirds_any(&self) -> bool {
        let total_power = self.state.lock().total_power;
        supermajority(total_power, self.validators.total_voting_power())
    }

    /// The latched majority block identifier, if any.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.state.lock().maj23
    }

    /// Package the winning precommits as commit evidence.
    ///
    /// Panics unless this is a precommit set with a latched majority;
    /// calling it in any other state is a bug in the consensus state
    /// machine, not a runtime condition.
    pub fn make_validation(&self) -> Validation {
        assert!(
            self.kind == VoteKind::Precommit,
            "make_validation on a {} set",
            self.kind
        );
        let state = self.state.lock();
        let maj23 = state
            .maj23
            .expect("make_validation without a two-thirds majority");
        let precommits = state
            .votes
            .iter()
            .map(|slot| slot.as_ref().filter(|vote| vote.block_id == maj23).cloned())
            .collect();
        Validation { precommits }
    }
}

impl fmt::Display for VoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "VoteSet{{H:{} R:{} T:{} +2/3:{} {}}}",
            self.height,
            self.round,
            self.kind,
            state.maj23.is_some(),
            state.bitfield
        )
    }
}

impl fmt::Debug for VoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Packaged precommit evidence for a committed block.
///
/// One slot per validator in index order; a slot is filled when that
/// validator precommitted the winning block identifier. The filled slots
/// together carry strictly more than two thirds of total voting power.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Validator index -> matching precommit.
    pub precommits: Vec<Option<Vote>>,
}

impl Validation {
    /// Bitmap of validators whose precommit is present.
    pub fn bitfield(&self) -> SignerBitfield {
        let mut bits = SignerBitfield::new(self.precommits.len());
        for (index, slot) in self.precommits.iter().enumerate() {
            if slot.is_some() {
                bits.set(index);
            }
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::{Hash, KeyPair, PartSetHeader};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain() -> ChainId {
        ChainId::new("test-chain")
    }

    fn make_validators(powers: &[u64]) -> (Vec<KeyPair>, Arc<ValidatorSet>) {
        let keys: Vec<KeyPair> = (0..powers.len())
            .map(|i| KeyPair::from_seed([i as u8 + 1; 32]))
            .collect();
        let validators = keys
            .iter()
            .zip(powers)
            .map(|(key, &power)| Validator::new(key.public_key(), power))
            .collect();
        (keys, Arc::new(ValidatorSet::new(validators)))
    }

    fn block(tag: &[u8]) -> BlockId {
        BlockId::new(Hash::digest(tag), PartSetHeader::new(1, Hash::digest(b"parts")))
    }

    fn precommit(key: &KeyPair, block_id: BlockId) -> Vote {
        Vote::sign(&chain(), 1, 0, VoteKind::Precommit, block_id, key)
    }

    fn prevote(key: &KeyPair, block_id: BlockId) -> Vote {
        Vote::sign(&chain(), 1, 0, VoteKind::Prevote, block_id, key)
    }

    #[test]
    #[should_panic(expected = "height 0")]
    fn test_height_zero_panics() {
        let (_, validators) = make_validators(&[1]);
        VoteSet::new(0, 0, VoteKind::Prevote, chain(), validators);
    }

    #[test]
    fn test_majority_latches_on_third_vote() {
        let (keys, validators) = make_validators(&[1, 1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let target = block(b"aa");

        assert!(set.add_by_index(0, precommit(&keys[0], target)).unwrap().is_added());
        assert!(!set.has_two_thirds_majority());

        // Two of four is exactly the two-thirds floor, not strictly above.
        assert!(set.add_by_index(1, precommit(&keys[1], target)).unwrap().is_added());
        assert!(!set.has_two_thirds_majority());
        assert!(set.two_thirds_majority().is_none());

        assert!(set.add_by_index(2, precommit(&keys[2], target)).unwrap().is_added());
        assert!(set.has_two_thirds_majority());
        assert_eq!(set.two_thirds_majority(), Some(target));

        let validation = set.make_validation();
        assert_eq!(validation.precommits.len(), 4);
        assert!(validation.precommits[0].is_some());
        assert!(validation.precommits[1].is_some());
        assert!(validation.precommits[2].is_some());
        assert!(validation.precommits[3].is_none());
        assert_eq!(validation.bitfield().count_ones(), 3);
    }

    #[test]
    fn test_exactly_two_thirds_does_not_latch() {
        // Total power 9: a tally of 6 is not strictly greater than 2/3.
        let (keys, validators) = make_validators(&[6, 3]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let target = block(b"aa");

        assert!(set.add_by_index(0, precommit(&keys[0], target)).unwrap().is_added());
        assert!(!set.has_two_thirds_majority());
        assert!(!set.has_two_thirds_any());

        assert!(set.add_by_index(1, precommit(&keys[1], target)).unwrap().is_added());
        assert!(set.has_two_thirds_majority());
    }

    #[test]
    fn test_conflicting_vote_returns_both_votes() {
        let (keys, validators) = make_validators(&[5, 4]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        let first = prevote(&keys[0], block(b"aa"));
        let second = prevote(&keys[0], block(b"bb"));

        assert_eq!(
            set.add_by_index(0, first.clone()).unwrap(),
            AddOutcome::Added { index: 0 }
        );
        let err = set.add_by_index(0, second.clone()).unwrap_err();
        assert_eq!(
            err,
            VoteError::ConflictingSignature {
                prior: Box::new(first.clone()),
                conflicting: Box::new(second),
            }
        );

        // The prior vote stays; nothing about the set changed.
        assert_eq!(set.get_by_index(0), Some(first));
        assert_eq!(set.bitfield().count_ones(), 1);
        assert!(!set.has_two_thirds_any());
    }

    #[test]
    fn test_duplicate_vote_is_idempotent() {
        let (keys, validators) = make_validators(&[1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let vote = precommit(&keys[0], block(b"aa"));

        assert_eq!(
            set.add_by_index(0, vote.clone()).unwrap(),
            AddOutcome::Added { index: 0 }
        );
        assert_eq!(
            set.add_by_index(0, vote).unwrap(),
            AddOutcome::Duplicate { index: 0 }
        );
        assert_eq!(set.bitfield().count_ones(), 1);
    }

    #[test]
    fn test_nil_votes_reach_majority() {
        let (keys, validators) = make_validators(&[1, 1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        for (index, key) in keys.iter().take(3).enumerate() {
            assert!(set
                .add_by_index(index, prevote(key, BlockId::nil()))
                .unwrap()
                .is_added());
        }
        assert_eq!(set.two_thirds_majority(), Some(BlockId::nil()));
    }

    #[test]
    fn test_single_validator_latches_immediately() {
        let (keys, validators) = make_validators(&[10]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let target = block(b"aa");

        assert!(set.add_by_index(0, precommit(&keys[0], target)).unwrap().is_added());
        assert_eq!(set.two_thirds_majority(), Some(target));
    }

    #[test]
    fn test_weighted_crossing() {
        // Total 7: the majority needs a tally of at least 5.
        let (keys, validators) = make_validators(&[1, 2, 4]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let target = block(b"aa");

        assert!(set.add_by_index(2, precommit(&keys[2], target)).unwrap().is_added());
        assert!(!set.has_two_thirds_majority());

        assert!(set.add_by_index(0, precommit(&keys[0], target)).unwrap().is_added());
        assert_eq!(set.two_thirds_majority(), Some(target));
    }

    #[test]
    fn test_unexpected_step_is_rejected() {
        let (keys, validators) = make_validators(&[1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        let wrong_round = Vote::sign(&chain(), 1, 3, VoteKind::Prevote, block(b"aa"), &keys[0]);
        let wrong_height = Vote::sign(&chain(), 2, 0, VoteKind::Prevote, block(b"aa"), &keys[0]);
        let wrong_kind = Vote::sign(&chain(), 1, 0, VoteKind::Precommit, block(b"aa"), &keys[0]);

        for vote in [wrong_round, wrong_height, wrong_kind] {
            assert_eq!(set.add_by_index(0, vote).unwrap_err(), VoteError::UnexpectedStep);
        }
        assert_eq!(set.bitfield().count_ones(), 0);
    }

    #[test]
    fn test_bad_signatures_are_rejected() {
        let (keys, validators) = make_validators(&[1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        // Signed by the wrong key for the claimed index.
        let forged = prevote(&keys[1], block(b"aa"));
        assert_eq!(
            set.add_by_index(0, forged).unwrap_err(),
            VoteError::InvalidSignature
        );

        // Signed for another chain.
        let other_chain = Vote::sign(
            &ChainId::new("other-chain"),
            1,
            0,
            VoteKind::Prevote,
            block(b"aa"),
            &keys[0],
        );
        assert_eq!(
            set.add_by_index(0, other_chain).unwrap_err(),
            VoteError::InvalidSignature
        );
    }

    #[test]
    fn test_unknown_signers_are_rejected() {
        let (keys, validators) = make_validators(&[1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);
        let vote = prevote(&keys[0], block(b"aa"));

        assert_eq!(
            set.add_by_index(7, vote.clone()).unwrap_err(),
            VoteError::InvalidAccount
        );

        let stranger = Validator::new(KeyPair::from_seed([99; 32]).public_key(), 1);
        assert_eq!(
            set.add_by_address(&stranger.address, vote).unwrap_err(),
            VoteError::InvalidAccount
        );
    }

    #[test]
    fn test_add_by_address_resolves_index() {
        let (keys, validators) = make_validators(&[1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), Arc::clone(&validators));
        let address = validators.get_by_index(1).unwrap().address;

        assert_eq!(
            set.add_by_address(&address, prevote(&keys[1], block(b"aa"))).unwrap(),
            AddOutcome::Added { index: 1 }
        );
        assert!(set.get_by_address(&address).is_some());
        assert!(set.get_by_index(0).is_none());
    }

    #[test]
    #[should_panic(expected = "not a validator")]
    fn test_get_by_address_unknown_panics() {
        let (_, validators) = make_validators(&[1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);
        let stranger = Validator::new(KeyPair::from_seed([99; 32]).public_key(), 1);
        set.get_by_address(&stranger.address);
    }

    #[test]
    fn test_split_votes_reach_any_but_not_majority() {
        let (keys, validators) = make_validators(&[1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        set.add_by_index(0, prevote(&keys[0], block(b"aa"))).unwrap();
        set.add_by_index(1, prevote(&keys[1], block(b"bb"))).unwrap();
        set.add_by_index(2, prevote(&keys[2], block(b"cc"))).unwrap();

        assert!(set.has_two_thirds_any());
        assert!(!set.has_two_thirds_majority());
    }

    #[test]
    fn test_latch_never_changes() {
        let (keys, validators) = make_validators(&[1, 1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        let winner = block(b"aa");

        for index in 0..3 {
            set.add_by_index(index, precommit(&keys[index], winner)).unwrap();
        }
        assert_eq!(set.two_thirds_majority(), Some(winner));

        // A straggler voting elsewhere does not disturb the latch.
        set.add_by_index(3, precommit(&keys[3], block(b"bb"))).unwrap();
        assert_eq!(set.two_thirds_majority(), Some(winner));
        assert!(set.has_two_thirds_majority());
    }

    #[test]
    fn test_bitfield_is_a_snapshot() {
        let (keys, validators) = make_validators(&[1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);

        set.add_by_index(0, prevote(&keys[0], block(b"aa"))).unwrap();
        let snapshot = set.bitfield();

        set.add_by_index(1, prevote(&keys[1], block(b"aa"))).unwrap();
        assert_eq!(snapshot.count_ones(), 1);
        assert_eq!(set.bitfield().count_ones(), 2);
    }

    #[test]
    #[should_panic(expected = "make_validation on a Prevote set")]
    fn test_make_validation_requires_precommit_kind() {
        let (keys, validators) = make_validators(&[1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);
        set.add_by_index(0, prevote(&keys[0], block(b"aa"))).unwrap();
        assert!(set.has_two_thirds_majority());
        set.make_validation();
    }

    #[test]
    #[should_panic(expected = "without a two-thirds majority")]
    fn test_make_validation_requires_majority() {
        let (_, validators) = make_validators(&[1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        set.make_validation();
    }

    #[test]
    fn test_validation_rebuilds_the_same_majority() {
        let (keys, validators) = make_validators(&[3, 2, 2, 2]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), Arc::clone(&validators));
        let winner = block(b"aa");

        for index in 0..3 {
            set.add_by_index(index, precommit(&keys[index], winner)).unwrap();
        }
        set.add_by_index(3, precommit(&keys[3], block(b"bb"))).unwrap();

        let validation = set.make_validation();

        // Feeding the packaged precommits into a fresh set reconstructs
        // the same majority.
        let fresh = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        for (index, slot) in validation.precommits.iter().enumerate() {
            if let Some(vote) = slot {
                assert!(fresh.add_by_index(index, vote.clone()).unwrap().is_added());
            }
        }
        assert_eq!(fresh.two_thirds_majority(), Some(winner));
    }

    #[test]
    fn test_concurrent_adds_accept_one() {
        let (keys, validators) = make_validators(&[1, 1, 1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Prevote, chain(), validators);
        let vote = prevote(&keys[0], block(b"aa"));

        let added = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if set.add_by_index(0, vote.clone()).unwrap().is_added() {
                        added.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(added.load(Ordering::Relaxed), 1);
        assert_eq!(set.bitfield().count_ones(), 1);
    }

    #[test]
    fn test_display_short_form() {
        let (keys, validators) = make_validators(&[1, 1]);
        let set = VoteSet::new(1, 0, VoteKind::Precommit, chain(), validators);
        set.add_by_index(0, precommit(&keys[0], block(b"aa"))).unwrap();

        assert_eq!(set.to_string(), "VoteSet{H:1 R:0 T:Precommit +2/3:false x_}");
    }
}
