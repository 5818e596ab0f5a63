//! Per-height vote bookkeeping across rounds.

use crate::{AddOutcome, CatchupThrottled, PeerId, VoteError, VoteObserver, VoteSet};
use palisade_types::{Address, ChainId, ValidatorSet, Vote, VoteKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The prevote and precommit accumulators for one round.
#[derive(Clone)]
pub struct RoundVoteSet {
    /// First-phase votes.
    pub prevotes: Arc<VoteSet>,
    /// Second-phase votes.
    pub precommits: Arc<VoteSet>,
}

impl RoundVoteSet {
    /// The accumulator for the given kind.
    pub fn get(&self, kind: VoteKind) -> Arc<VoteSet> {
        match kind {
            VoteKind::Prevote => Arc::clone(&self.prevotes),
            VoteKind::Precommit => Arc::clone(&self.precommits),
        }
    }
}

/// Tracks all vote sets of one height, from round 0 to the current round.
///
/// Also keeps up to one round greater than the current round per peer, to
/// facilitate catch-up syncing of commits: a commit is +2/3 precommits at
/// some round not known in advance, so a precommit for a future round
/// opens that round speculatively — once per peer, to bound abuse.
///
/// A height vote set is created on entering a height and discarded once
/// the height commits; it never tracks more than one height.
///
/// Lock order is container before leaf. The container lock is dropped
/// before delegating an add, so signature verification for one round
/// never blocks traffic for another; the leaf never calls back in.
pub struct HeightVoteSet {
    height: u64,
    chain_id: ChainId,
    validators: Arc<ValidatorSet>,
    observer: Option<Arc<dyn VoteObserver>>,
    state: Mutex<HeightVoteSetState>,
}

struct HeightVoteSetState {
    /// Highest locally admitted round. Monotonically non-decreasing.
    round: u32,
    /// Every round in `[0, round]`, plus peer catch-up rounds above.
    rounds: HashMap<u32, RoundVoteSet>,
    /// The single catch-up round granted to each peer.
    peer_catchup_rounds: HashMap<PeerId, u32>,
}

impl HeightVoteSet {
    /// Create the vote bookkeeping for one height, with round 0 admitted.
    pub fn new(height: u64, chain_id: ChainId, validators: Arc<ValidatorSet>) -> Self {
        Self::build(height, chain_id, validators, None)
    }

    /// Like [`HeightVoteSet::new`], with an observer for abuse signals.
    pub fn with_observer(
        height: u64,
        chain_id: ChainId,
        validators: Arc<ValidatorSet>,
        observer: Arc<dyn VoteObserver>,
    ) -> Self {
        Self::build(height, chain_id, validators, Some(observer))
    }

    fn build(
        height: u64,
        chain_id: ChainId,
        validators: Arc<ValidatorSet>,
        observer: Option<Arc<dyn VoteObserver>>,
    ) -> Self {
        let mut rounds = HashMap::new();
        rounds.insert(0, Self::make_round(height, 0, &chain_id, &validators));
        Self {
            height,
            chain_id,
            validators,
            observer,
            state: Mutex::new(HeightVoteSetState {
                round: 0,
                rounds,
                peer_catchup_rounds: HashMap::new(),
            }),
        }
    }

    fn make_round(
        height: u64,
        round: u32,
        chain_id: &ChainId,
        validators: &Arc<ValidatorSet>,
    ) -> RoundVoteSet {
        RoundVoteSet {
            prevotes: Arc::new(VoteSet::new(
                height,
                round,
                VoteKind::Prevote,
                chain_id.clone(),
                Arc::clone(validators),
            )),
            precommits: Arc::new(VoteSet::new(
                height,
                round,
                VoteKind::Precommit,
                chain_id.clone(),
                Arc::clone(validators),
            )),
        }
    }

    /// Height this set tracks.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Highest locally admitted round.
    pub fn round(&self) -> u32 {
        self.state.lock().round
    }

    /// Extend admitted rounds up to `round`.
    ///
    /// Panics unless strictly advancing. Round 0 was admitted once at
    /// construction, so only from the initial state is a non-advancing
    /// call (of round 0 itself) tolerated as a no-op.
    pub fn set_round(&self, round: u32) {
        let mut state = self.state.lock();
        assert!(
            state.round == 0 || round > state.round,
            "set_round must advance the round ({} -> {round})",
            state.round
        );
        for r in state.round + 1..=round {
            // May already exist from a peer catch-up.
            if !state.rounds.contains_key(&r) {
                let round_set = Self::make_round(self.height, r, &self.chain_id, &self.validators);
                state.rounds.insert(r, round_set);
            }
        }
        state.round = round;
    }

    /// Route a signed vote to its `(round, kind)` vote set.
    ///
    /// A vote for a round beyond the current one opens that round the
    /// first time a given peer asks. Later future-round votes from the
    /// same peer are dropped with [`AddOutcome::Throttled`], a warning,
    /// and an observer event — not an error. By convention
    /// [`PeerId::local`] marks votes from the local validator.
    pub fn add_by_address(
        &self,
        address: &Address,
        vote: Vote,
        peer: &PeerId,
    ) -> Result<AddOutcome, VoteError> {
        let routed: Result<Arc<VoteSet>, CatchupThrottled> = {
            let mut state = self.state.lock();
            if let Some(round_set) = state.rounds.get(&vote.round) {
                Ok(round_set.get(vote.kind))
            } else if let Some(&admitted) = state.peer_catchup_rounds.get(peer) {
                // This peer already spent its one catch-up round.
                Err(CatchupThrottled {
                    height: self.height,
                    peer: peer.clone(),
                    admitted_round: admitted,
                    rejected_round: vote.round,
                    kind: vote.kind,
                })
            } else {
                let round_set =
                    Self::make_round(self.height, vote.round, &self.chain_id, &self.validators);
                let vote_set = round_set.get(vote.kind);
                state.rounds.insert(vote.round, round_set);
                state.peer_catchup_rounds.insert(peer.clone(), vote.round);
                Ok(vote_set)
            }
        };

        match routed {
            // Container lock is released here; verification runs under the
            // leaf lock only.
            Ok(vote_set) => vote_set.add_by_address(address, vote),
            Err(event) => {
                warn!(
                    height = event.height,
                    peer = %event.peer,
                    admitted_round = event.admitted_round,
                    rejected_round = event.rejected_round,
                    "Dropping vote for unwanted round"
                );
                if let Some(observer) = &self.observer {
                    observer.catchup_throttled(event);
                }
                Ok(AddOutcome::Throttled)
            }
        }
    }

    /// Prevote set for a round, if that round exists.
    pub fn prevotes(&self, round: u32) -> Option<Arc<VoteSet>> {
        self.state
            .lock()
            .rounds
            .get(&round)
            .map(|round_set| Arc::clone(&round_set.prevotes))
    }

    /// Precommit set for a round, if that round exists.
    pub fn precommits(&self, round: u32) -> Option<Arc<VoteSet>> {
        self.state
            .lock()
            .rounds
            .get(&round)
            .map(|round_set| Arc::clone(&round_set.precommits))
    }

    /// Highest round at or below the current one whose prevotes hold a
    /// +2/3 majority, if any. Informs lock decisions in the state machine.
    pub fn pol_round(&self) -> Option<u32> {
        let state = self.state.lock();
        (0..=state.round).rev().find(|round| {
            state
                .rounds
                .get(round)
                .is_some_and(|round_set| round_set.prevotes.has_two_thirds_majority())
        })
    }
}

impl fmt::Display for HeightVoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        writeln!(f, "HeightVoteSet{{H:{} R:0~{}", self.height, state.round)?;
        for round in 0..=state.round {
            if let Some(round_set) = state.rounds.get(&round) {
                writeln!(f, "  {}", round_set.prevotes)?;
                writeln!(f, "  {}", round_set.precommits)?;
            }
        }
        // Peer catch-up rounds, above the current round.
        let mut catchup: Vec<u32> = state
            .rounds
            .keys()
            .copied()
            .filter(|round| *round > state.round)
            .collect();
        catchup.sort_unstable();
        for round in catchup {
            let round_set = &state.rounds[&round];
            writeln!(f, "  {}", round_set.prevotes)?;
            writeln!(f, "  {}", round_set.precommits)?;
        }
        write!(f, "}}")
    }
}
