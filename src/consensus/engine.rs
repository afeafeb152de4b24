//! The consensus core.
//!
//! `Hashgraph` owns the participant table and a [`Store`], accepts validated
//! events, and turns the growing graph into a total order. Per inserted
//! event it resolves wire indices and maintains the coordinate vectors that
//! make every graph relation an O(n) comparison. A sweep
//! ([`Hashgraph::progress`]) then runs `divide_rounds → decide_fame →
//! find_order`; each phase resumes from its recorded markers, so sweeps are
//! idempotent and interruptible between phases.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::consensus::event::{Coord, Event, EventId, WireEvent};
use crate::consensus::peers::Peers;
use crate::consensus::rounds::{Fame, RoundInfo};
use crate::crypto::keys::{Signature, SigningKeypair};
use crate::storage::{Store, StoreError};

/// Errors raised by the consensus engine.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A referenced parent is not in the store. The caller may hold the
    /// event and retry once the parent has been gossiped.
    #[error("referenced parent is not in the store")]
    UnknownParent,
    /// A second event claimed an already-occupied `(creator, index)` slot.
    #[error("fork: participant {creator_id} already has an event at index {index}")]
    ForkDetected { creator_id: i64, index: i64 },
    /// Signature verification failed; the event is rejected permanently.
    #[error("event signature is invalid")]
    BadSignature,
    /// The event does not extend its creator's chain by exactly one.
    #[error("event index {got} does not follow expected index {expected}")]
    IndexGap { expected: i64, got: i64 },
    /// The same event was inserted twice; safe to treat as a no-op.
    #[error("event already inserted")]
    AlreadyInserted,
    /// The queried result cannot be computed from the data seen so far.
    #[error("not enough data to answer yet")]
    NotReady,
    /// The event's creator is not in the participant table.
    #[error("event creator is not a known participant")]
    UnknownParticipant,
    /// No local keypair was configured before calling `submit`.
    #[error("no local identity configured")]
    NoIdentity,
    /// A store invariant is broken. Fatal: the engine must halt.
    #[error("store invariant broken: {0}")]
    Corruption(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters returned by one sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepStats {
    /// Events appended to the consensus order by this sweep.
    pub ordered: usize,
    /// Events inserted but not yet ordered.
    pub pending: usize,
    /// Rounds whose witnesses are not all decided yet.
    pub undecided_rounds: usize,
}

/// One entry of the consensus output stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusEvent {
    /// Position in the total order, starting at 0.
    pub position: usize,
    pub id: EventId,
    pub consensus_timestamp: u64,
    pub payload: Vec<Vec<u8>>,
}

/// The consensus engine.
pub struct Hashgraph<S: Store> {
    peers: Peers,
    store: S,
    config: EngineConfig,
    identity: Option<SigningKeypair>,
    /// Inserted events not yet ordered, in insertion order.
    undetermined_events: Vec<EventId>,
    /// Rounds with undecided witnesses, ascending.
    undecided_rounds: Vec<i64>,
    /// Loaded (payload-bearing or genesis) events not yet ordered; the
    /// node's backpressure signal.
    pending_loaded_events: usize,
}

impl<S: Store> Hashgraph<S> {
    pub fn new(peers: Peers, store: S, config: EngineConfig) -> Self {
        Hashgraph {
            peers,
            store,
            config: config.sanitized(),
            identity: None,
            undetermined_events: Vec::new(),
            undecided_rounds: Vec::new(),
            pending_loaded_events: 0,
        }
    }

    /// Configure the local identity used by [`submit`](Self::submit). The
    /// key must belong to the participant table.
    pub fn set_identity(&mut self, keypair: SigningKeypair) -> Result<(), ConsensusError> {
        if self.peers.id_of(&keypair.public).is_none() {
            return Err(ConsensusError::UnknownParticipant);
        }
        self.identity = Some(keypair);
        Ok(())
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loaded-but-unordered event count; the host throttles gossip on this.
    pub fn pending_loaded_events(&self) -> usize {
        self.pending_loaded_events
    }

    /// Rounds whose witnesses are not all decided, ascending.
    pub fn undecided_rounds(&self) -> &[i64] {
        &self.undecided_rounds
    }

    /// Event **counts** per participant id, as exchanged by gossip to
    /// compute deltas (a participant with events `0..=k` reports `k + 1`).
    pub fn known(&self) -> BTreeMap<usize, i64> {
        self.store
            .known()
            .into_iter()
            .map(|(p, last)| (p, last + 1))
            .collect()
    }

    // ── Insert path ──

    /// Create, self-sign, and insert a new local event on top of the last
    /// local event. The other-parent is chosen by the gossip layer.
    pub fn submit(
        &mut self,
        payload: Vec<Vec<u8>>,
        other_parent: Option<EventId>,
    ) -> Result<Event, ConsensusError> {
        let keypair = self.identity.clone().ok_or(ConsensusError::NoIdentity)?;
        let creator = self
            .peers
            .id_of(&keypair.public)
            .ok_or(ConsensusError::UnknownParticipant)?;
        let self_parent = self.store.last_from(creator)?;
        let index = match &self_parent {
            Some(id) => self.store.get_event(id)?.index() + 1,
            None => 0,
        };
        let mut event = Event::new(payload, self_parent, other_parent, keypair.public.clone(), index);
        event.sign(&keypair);
        let id = event.id();
        self.insert(event)?;
        Ok(self.store.get_event(&id)?)
    }

    /// Insert a remote event after signature and structural validation.
    pub fn insert(&mut self, mut event: Event) -> Result<(), ConsensusError> {
        let id = event.id();
        if self.store.contains(&id) {
            return Err(ConsensusError::AlreadyInserted);
        }
        if !event.verify() {
            return Err(ConsensusError::BadSignature);
        }
        let creator = self
            .peers
            .id_of(event.creator())
            .ok_or(ConsensusError::UnknownParticipant)?;

        self.check_parents(&event, creator)?;
        self.resolve_wire_info(&mut event, creator)?;
        self.init_event_coordinates(&mut event)?;
        self.store.set_event(event.clone())?;
        self.update_ancestor_first_descendant(&event)?;

        self.undetermined_events.push(id);
        if event.is_loaded() {
            self.pending_loaded_events += 1;
        }
        tracing::debug!(event = %id, creator, index = event.index(), "inserted event");
        Ok(())
    }

    /// Structural validation: the self-parent must be the creator's latest
    /// event and the index must extend the chain by exactly one; the
    /// other-parent must already be stored.
    fn check_parents(&self, event: &Event, creator: usize) -> Result<(), ConsensusError> {
        let last = self.store.last_from(creator)?;
        match (event.self_parent(), last) {
            (None, None) => {
                if event.index() != 0 {
                    return Err(ConsensusError::IndexGap {
                        expected: 0,
                        got: event.index(),
                    });
                }
            }
            // A second genesis for this creator: the slot is taken.
            (None, Some(_)) => {
                return Err(ConsensusError::ForkDetected {
                    creator_id: creator as i64,
                    index: event.index(),
                });
            }
            (Some(sp), Some(last_id)) if *sp == last_id => {
                let sp_event = self.store.get_event(sp)?;
                let expected = sp_event.index() + 1;
                if event.index() != expected {
                    return Err(ConsensusError::IndexGap {
                        expected,
                        got: event.index(),
                    });
                }
            }
            (Some(sp), _) => {
                if !self.store.contains(sp) {
                    return Err(ConsensusError::UnknownParent);
                }
                // The self-parent exists but is not the creator's chain
                // head: a competing chain slot.
                return Err(ConsensusError::ForkDetected {
                    creator_id: creator as i64,
                    index: event.index(),
                });
            }
        }
        if let Some(op) = event.other_parent() {
            if !self.store.contains(op) {
                return Err(ConsensusError::UnknownParent);
            }
        }
        Ok(())
    }

    fn resolve_wire_info(&self, event: &mut Event, creator: usize) -> Result<(), ConsensusError> {
        event.creator_id = creator as i64;
        if let Some(sp) = event.self_parent() {
            event.self_parent_index = self.store.get_event(sp)?.index();
        }
        if let Some(op) = event.other_parent().copied() {
            let op_event = self.store.get_event(&op)?;
            event.other_parent_creator_id = op_event.creator_id();
            event.other_parent_index = op_event.index();
        }
        Ok(())
    }

    /// Seed the event's coordinate vectors from its parents: per-participant
    /// maximum of the parents' last-ancestors, then the event itself in its
    /// creator's slot.
    fn init_event_coordinates(&self, event: &mut Event) -> Result<(), ConsensusError> {
        let members = self.peers.len();
        event.first_descendants = vec![Coord::unseen(); members];

        let self_parent = match event.self_parent() {
            Some(p) => Some(self.store.get_event(p)?),
            None => None,
        };
        let other_parent = match event.other_parent() {
            Some(p) => Some(self.store.get_event(p)?),
            None => None,
        };
        event.last_ancestors = match (&self_parent, &other_parent) {
            (None, None) => vec![Coord::none(); members],
            (Some(sp), None) => sp.last_ancestors().to_vec(),
            (None, Some(op)) => op.last_ancestors().to_vec(),
            (Some(sp), Some(op)) => {
                let mut merged = sp.last_ancestors().to_vec();
                for (slot, other) in merged.iter_mut().zip(op.last_ancestors()) {
                    if slot.index < other.index {
                        *slot = other.clone();
                    }
                }
                merged
            }
        };

        let creator = event.creator_id() as usize;
        let own = Coord::at(event.index(), event.id());
        event.first_descendants[creator] = own.clone();
        event.last_ancestors[creator] = own;
        Ok(())
    }

    /// Propagate the new event as first descendant: for each participant,
    /// walk backward along self-parent links from the event's last ancestor
    /// and fill every slot the new event is the first to dominate. Stops at
    /// an already-set entry since everything below it is set too.
    fn update_ancestor_first_descendant(&mut self, event: &Event) -> Result<(), ConsensusError> {
        let creator = event.creator_id() as usize;
        let index = event.index();
        let id = event.id();
        for coord in event.last_ancestors().to_vec() {
            let mut cursor = coord.id;
            while let Some(ancestor_id) = cursor {
                let mut ancestor = match self.store.get_event(&ancestor_id) {
                    Ok(a) => a,
                    Err(StoreError::NotFound) => break,
                    Err(e) => return Err(e.into()),
                };
                if ancestor.first_descendants[creator].index > index {
                    ancestor.first_descendants[creator] = Coord::at(index, id);
                    cursor = ancestor.self_parent().copied();
                    self.store.set_event(ancestor)?;
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Reconstruct a full event from its compact gossip form. Lossless iff
    /// the store already contains the referenced parents.
    pub fn read_wire_info(&self, wire: WireEvent) -> Result<Event, ConsensusError> {
        let creator_id = usize::try_from(wire.body.creator_id)
            .map_err(|_| ConsensusError::UnknownParticipant)?;
        let creator = self
            .peers
            .key_of(creator_id)
            .ok_or(ConsensusError::UnknownParticipant)?
            .clone();

        let self_parent = if wire.body.self_parent_index >= 0 {
            Some(
                self.store
                    .participant_event(creator_id, wire.body.self_parent_index)
                    .map_err(not_found_is_unknown_parent)?,
            )
        } else {
            None
        };
        let other_parent = if wire.body.other_parent_index >= 0 {
            let op_creator = usize::try_from(wire.body.other_parent_creator_id)
                .map_err(|_| ConsensusError::UnknownParticipant)?;
            Some(
                self.store
                    .participant_event(op_creator, wire.body.other_parent_index)
                    .map_err(not_found_is_unknown_parent)?,
            )
        } else {
            None
        };

        let mut event = Event::new_at(
            wire.body.payload,
            self_parent,
            other_parent,
            creator,
            wire.body.index,
            wire.body.timestamp_ms,
        );
        event.signature = Signature::from_scalars(wire.r, wire.s);
        Ok(event)
    }

    // ── Graph relations ──

    /// True iff `y` is an ancestor of `x` (reflexively). Unknown ids make
    /// every relation false.
    pub fn ancestor(&self, x: &EventId, y: &EventId) -> bool {
        let (Ok(ex), Ok(ey)) = (self.store.get_event(x), self.store.get_event(y)) else {
            return false;
        };
        let creator = ey.creator_id();
        if creator < 0 {
            return false;
        }
        ex.last_ancestors()[creator as usize].index >= ey.index()
    }

    /// True iff `y` is on `x`'s own chain (reflexively).
    pub fn self_ancestor(&self, x: &EventId, y: &EventId) -> bool {
        let (Ok(ex), Ok(ey)) = (self.store.get_event(x), self.store.get_event(y)) else {
            return false;
        };
        ex.creator_id() >= 0 && ex.creator_id() == ey.creator_id() && ex.index() >= ey.index()
    }

    /// `see` coincides with `ancestor` in this engine: forks are rejected at
    /// insert, so no ancestor set ever contains two events sharing a
    /// `(creator, index)` slot.
    pub fn see(&self, x: &EventId, y: &EventId) -> bool {
        self.ancestor(x, y)
    }

    /// True iff `x` sees events by strictly more than 2n/3 participants
    /// that each see `y`. O(n): participant `p` counts iff `y`'s first
    /// descendant by `p` is no later than `x`'s last ancestor by `p`.
    pub fn strongly_see(&self, x: &EventId, y: &EventId) -> bool {
        let (Ok(ex), Ok(ey)) = (self.store.get_event(x), self.store.get_event(y)) else {
            return false;
        };
        let count = ex
            .last_ancestors()
            .iter()
            .zip(ey.first_descendants())
            .filter(|(last, first)| first.index <= last.index)
            .count();
        count >= self.peers.super_majority()
    }

    /// The earliest event on `x`'s own chain that sees `y`, if `x` itself
    /// sees `y` through it.
    pub fn oldest_self_ancestor_to_see(&self, x: &EventId, y: &EventId) -> Option<EventId> {
        let (Ok(ex), Ok(ey)) = (self.store.get_event(x), self.store.get_event(y)) else {
            return None;
        };
        let creator = ex.creator_id();
        if creator < 0 {
            return None;
        }
        let first = &ey.first_descendants()[creator as usize];
        if first.index <= ex.index() {
            first.id
        } else {
            None
        }
    }

    // ── Rounds ──

    /// Highest round among the parents; genesis events have parent round 0,
    /// and a missing parent contributes 0.
    pub fn parent_round(&self, x: &EventId) -> i64 {
        match self.store.get_event(x) {
            Ok(ex) => self.parent_round_of(&ex),
            Err(_) => -1,
        }
    }

    fn parent_round_of(&self, ex: &Event) -> i64 {
        if ex.self_parent().is_none() && ex.other_parent().is_none() {
            return 0;
        }
        let mut round = 0;
        if let Some(sp) = ex.self_parent() {
            round = round.max(self.round(sp));
        }
        if let Some(op) = ex.other_parent() {
            round = round.max(self.round(op));
        }
        round
    }

    /// True iff `x` strongly sees a super-majority of the witnesses of its
    /// parent round.
    pub fn round_inc(&self, x: &EventId) -> bool {
        let Ok(ex) = self.store.get_event(x) else {
            return false;
        };
        self.round_inc_from(x, self.parent_round_of(&ex))
    }

    fn round_inc_from(&self, x: &EventId, parent_round: i64) -> bool {
        if parent_round < 0 {
            return false;
        }
        let seen = self
            .round_witnesses(parent_round)
            .iter()
            .filter(|w| self.strongly_see(x, w))
            .count();
        seen >= self.peers.super_majority()
    }

    /// The round of `x`: the parent round, incremented when `x` strongly
    /// sees a super-majority of that round's witnesses. Reads the stored
    /// assignment when `divide_rounds` has already run.
    pub fn round(&self, x: &EventId) -> i64 {
        let Ok(ex) = self.store.get_event(x) else {
            return -1;
        };
        if let Some(round) = ex.round() {
            return round;
        }
        let parent_round = self.parent_round_of(&ex);
        if parent_round < 0 {
            return -1;
        }
        if self.round_inc_from(x, parent_round) {
            parent_round + 1
        } else {
            parent_round
        }
    }

    /// A witness is a genesis event or the first event of its creator to
    /// reach a round above its self-parent's.
    pub fn witness(&self, x: &EventId) -> bool {
        let Ok(ex) = self.store.get_event(x) else {
            return false;
        };
        match ex.self_parent() {
            None => true,
            Some(sp) => self.round(x) > self.round(sp),
        }
    }

    fn round_witnesses(&self, round: i64) -> Vec<EventId> {
        match self.store.get_round(round) {
            Ok(info) => info.witnesses(),
            Err(_) => Vec::new(),
        }
    }

    /// Assign a round to every undetermined event, in insertion order, and
    /// record it (with its witness flag) in the round's info. Re-entrant:
    /// events with an assigned round are skipped.
    pub fn divide_rounds(&mut self) -> Result<(), ConsensusError> {
        for x in self.undetermined_events.clone() {
            let event = self.store.get_event(&x)?;
            if event.round().is_some() {
                continue;
            }
            let round_number = self.round(&x);
            if round_number < 0 {
                // Parents not assigned yet; reconsidered on the next sweep.
                continue;
            }
            let is_witness = self.witness(&x);

            let mut event = event;
            event.set_round(round_number);
            self.store.set_event(event)?;

            let mut info = match self.store.get_round(round_number) {
                Ok(info) => info,
                Err(StoreError::NotFound) => {
                    self.undecided_rounds.push(round_number);
                    RoundInfo::new()
                }
                Err(e) => return Err(e.into()),
            };
            info.add_event(x, is_witness);
            self.store.set_round(round_number, info)?;
        }
        self.undecided_rounds.sort_unstable();
        self.undecided_rounds.dedup();
        Ok(())
    }

    // ── Fame ──

    /// Virtual voting: decide the fame of every undecided witness that the
    /// graph already contains enough later witnesses to judge.
    pub fn decide_fame(&mut self) -> Result<(), ConsensusError> {
        let coin_interval = self.config.coin_round_interval;
        let super_majority = self.peers.super_majority();
        // vote of witness `y` about witness `x`, rebuilt each sweep
        let mut votes: HashMap<(EventId, EventId), bool> = HashMap::new();
        let mut decided: Vec<i64> = Vec::new();

        for i in self.undecided_rounds.clone() {
            let mut round_info = self.store.get_round(i)?;
            for x in round_info.witnesses() {
                if round_info.is_decided_event(&x) {
                    continue;
                }
                'voting: for j in (i + 1)..=self.store.rounds() {
                    for y in self.round_witnesses(j) {
                        let d = j - i;
                        if d == 1 {
                            votes.insert((y, x), self.see(&y, &x));
                            continue;
                        }
                        // Tally the votes of the prior round's witnesses
                        // that y strongly sees.
                        let mut yes = 0usize;
                        let mut no = 0usize;
                        for w in self.round_witnesses(j - 1) {
                            if self.strongly_see(&y, &w) {
                                if votes.get(&(w, x)).copied().unwrap_or(false) {
                                    yes += 1;
                                } else {
                                    no += 1;
                                }
                            }
                        }
                        let vote = yes >= no;
                        let tally = yes.max(no);

                        if d % coin_interval != 0 {
                            if tally >= super_majority {
                                let fame = if vote { Fame::Famous } else { Fame::NotFamous };
                                round_info.set_fame(&x, fame);
                                votes.insert((y, x), vote);
                                tracing::debug!(witness = %x, round = i, ?fame,
                                    deciding_round = j, "witness fame decided");
                                break 'voting;
                            }
                            votes.insert((y, x), vote);
                        } else if tally >= super_majority {
                            // Coin round with a strong majority: keep the
                            // vote but defer the decision.
                            votes.insert((y, x), vote);
                        } else {
                            votes.insert((y, x), self.coin_flip(&y)?);
                        }
                    }
                }
            }
            self.store.set_round(i, round_info.clone())?;
            if round_info.is_decided() {
                decided.push(i);
                tracing::debug!(round = i, "all witnesses decided");
            }
        }
        self.undecided_rounds.retain(|r| !decided.contains(r));
        Ok(())
    }

    /// Deterministic pseudo-random vote: the middle bit of the witness's
    /// signature (bit 0 of byte 32 of the 64-byte `r ‖ s` encoding).
    fn coin_flip(&self, y: &EventId) -> Result<bool, ConsensusError> {
        let event = self.store.get_event(y)?;
        let sig = event.signature.as_bytes();
        if sig.is_empty() {
            return Ok(false);
        }
        Ok(sig[sig.len() / 2] & 1 == 1)
    }

    // ── Order ──

    /// Assign each undetermined event the first round whose famous-witness
    /// set is fully decided, non-empty, and entirely sees the event; stamp
    /// the median consensus timestamp. Re-entrant: events with a
    /// round-received are skipped, and the scan stops at the first round
    /// with undecided witnesses.
    pub fn decide_round_received(&mut self) -> Result<(), ConsensusError> {
        for x in self.undetermined_events.clone() {
            let event = self.store.get_event(&x)?;
            if event.round_received().is_some() {
                continue;
            }
            let round = self.round(&x);
            if round < 0 {
                continue;
            }
            for i in (round + 1)..=self.store.rounds() {
                let info = match self.store.get_round(i) {
                    Ok(info) => info,
                    Err(StoreError::NotFound) => break,
                    Err(e) => return Err(e.into()),
                };
                if !info.is_decided() {
                    break;
                }
                let famous = info.famous_witnesses();
                if famous.is_empty() || !famous.iter().all(|w| self.see(w, &x)) {
                    continue;
                }

                let mut timestamps = Vec::with_capacity(famous.len());
                for w in &famous {
                    if let Some(oldest) = self.oldest_self_ancestor_to_see(w, &x) {
                        timestamps.push(self.store.get_event(&oldest)?.timestamp_ms());
                    }
                }
                if timestamps.is_empty() {
                    return Err(ConsensusError::Corruption(format!(
                        "famous witnesses of round {i} see {x} but yield no timestamps"
                    )));
                }

                let mut event = event;
                event.set_round_received(i);
                event.set_consensus_timestamp(median(&mut timestamps));
                self.store.set_event(event)?;
                break;
            }
        }
        Ok(())
    }

    /// Append every newly round-received event to the consensus order,
    /// sorted by `(round received, consensus timestamp, whitened
    /// signature)`. Returns the number of events ordered.
    pub fn find_order(&mut self) -> Result<usize, ConsensusError> {
        self.decide_round_received()?;

        let mut received: Vec<Event> = Vec::new();
        let mut still_pending: Vec<EventId> = Vec::new();
        for x in &self.undetermined_events {
            let event = self.store.get_event(x)?;
            if event.round_received().is_some() {
                received.push(event);
            } else {
                still_pending.push(*x);
            }
        }
        if received.is_empty() {
            return Ok(0);
        }

        // Whitening masks, one per round received.
        let mut masks: BTreeMap<i64, [u8; 64]> = BTreeMap::new();
        for event in &received {
            let round = event.round_received().unwrap_or(0);
            if !masks.contains_key(&round) {
                masks.insert(round, self.round_mask(round)?);
            }
        }

        let mut keyed: Vec<(i64, u64, [u8; 64], Event)> = received
            .into_iter()
            .map(|event| {
                let round = event.round_received().unwrap_or(0);
                let ts = event.consensus_timestamp().unwrap_or(0);
                let white = whiten(&event.signature, &masks[&round]);
                (round, ts, white, event)
            })
            .collect();
        keyed.sort_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)));

        let ordered = keyed.len();
        for (_, _, _, event) in keyed {
            self.store.add_consensus_event(event.id())?;
            if event.is_loaded() {
                self.pending_loaded_events = self.pending_loaded_events.saturating_sub(1);
            }
        }
        self.undetermined_events = still_pending;
        Ok(ordered)
    }

    /// The whitening mask of a round: the byte-wise XOR fold of its famous
    /// witnesses' signatures. The fold is order-independent, so the mask is
    /// identical on every engine regardless of witness enumeration.
    fn round_mask(&self, round: i64) -> Result<[u8; 64], ConsensusError> {
        let info = self.store.get_round(round)?;
        let mut mask = [0u8; 64];
        for w in info.famous_witnesses() {
            let event = self.store.get_event(&w)?;
            for (m, b) in mask.iter_mut().zip(event.signature.as_bytes()) {
                *m ^= b;
            }
        }
        Ok(mask)
    }

    /// Run one sweep: `divide_rounds → decide_fame → find_order`, then
    /// persist the progress marker.
    pub fn progress(&mut self) -> Result<SweepStats, ConsensusError> {
        self.divide_rounds()?;
        self.decide_fame()?;
        let ordered = self.find_order()?;
        self.store.save_progress(&self.undecided_rounds)?;
        self.store.flush()?;

        let stats = SweepStats {
            ordered,
            pending: self.undetermined_events.len(),
            undecided_rounds: self.undecided_rounds.len(),
        };
        if stats.ordered > 0 {
            tracing::info!(
                ordered = stats.ordered,
                pending = stats.pending,
                undecided_rounds = stats.undecided_rounds,
                "sweep ordered events"
            );
        } else {
            tracing::debug!(pending = stats.pending, "sweep made no progress");
        }
        Ok(stats)
    }

    /// Restartable stream over the consensus order, starting at `from`.
    pub fn consensus_stream(
        &self,
        from: usize,
    ) -> impl Iterator<Item = Result<ConsensusEvent, ConsensusError>> + '_ {
        self.store
            .consensus_events()
            .into_iter()
            .enumerate()
            .skip(from)
            .map(move |(position, id)| {
                let event = self.store.get_event(&id)?;
                let consensus_timestamp = event.consensus_timestamp().ok_or_else(|| {
                    ConsensusError::Corruption(format!("consensus event {id} has no timestamp"))
                })?;
                Ok(ConsensusEvent {
                    position,
                    id,
                    consensus_timestamp,
                    payload: event.body.payload,
                })
            })
    }
}

fn not_found_is_unknown_parent(e: StoreError) -> ConsensusError {
    match e {
        StoreError::NotFound => ConsensusError::UnknownParent,
        other => other.into(),
    }
}

/// Median of the given timestamps: the middle element of the sorted values.
fn median(values: &mut [u64]) -> u64 {
    values.sort_unstable();
    values[values.len() / 2]
}

/// XOR a signature with a round mask; events signed by verified creators
/// always carry full 64-byte signatures.
fn whiten(signature: &Signature, mask: &[u8; 64]) -> [u8; 64] {
    let mut out = *mask;
    for (o, b) in out.iter_mut().zip(signature.as_bytes()) {
        *o ^= b;
    }
    out
}
