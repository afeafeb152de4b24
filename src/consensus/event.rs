//! Events, the nodes of the graph.
//!
//! An event is an immutable signed record: an opaque payload, two parent
//! references, the creator's public key, a creator-local sequence index,
//! and the creator's clock reading. Its identity is the BLAKE3 hash of the
//! body alone; the signature is excluded so a relay cannot regrind an
//! event's identity by re-signing it.
//!
//! On top of the immutable body the engine decorates each event with
//! resolved wire indices, the per-participant coordinate vectors that make
//! graph relations O(n), and the consensus results (round, round-received,
//! consensus timestamp). Decorations are set once and never revised.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::{Signature, SigningKeypair, SigningPublicKey};
use crate::Hash;

/// Sentinel index meaning "no such event yet" in coordinates and wire info.
pub const INDEX_NONE: i64 = -1;
/// Sentinel index meaning "no descendant yet" in first-descendant coordinates.
pub const INDEX_UNSEEN: i64 = i64::MAX;

/// Unique identifier for an event: the hash of its body.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub crate::Hash);

impl EventId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell events apart in logs.
        write!(f, "EventId({}…)", hex::encode(&self.0[..4]))
    }
}

/// Per-participant coordinate: where on that participant's chain a related
/// event sits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coord {
    pub index: i64,
    pub id: Option<EventId>,
}

impl Coord {
    /// "No such ancestor known yet."
    pub fn none() -> Self {
        Coord {
            index: INDEX_NONE,
            id: None,
        }
    }

    /// "No descendant exists yet."
    pub fn unseen() -> Self {
        Coord {
            index: INDEX_UNSEEN,
            id: None,
        }
    }

    pub fn at(index: i64, id: EventId) -> Self {
        Coord {
            index,
            id: Some(id),
        }
    }
}

/// The immutable, signed part of an event. The event id hashes exactly
/// these fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    /// Ordered opaque byte strings submitted by the host.
    pub payload: Vec<Vec<u8>>,
    /// The creator's prior event; `None` for a genesis event.
    pub self_parent: Option<EventId>,
    /// An event learned from another participant; `None` for initial events.
    pub other_parent: Option<EventId>,
    /// Public key of the creator.
    pub creator: SigningPublicKey,
    /// Creator-local sequence number, starting at 0.
    pub index: i64,
    /// The creator's local clock at creation, unix millis. Consensus
    /// timestamps are medians of these readings.
    pub timestamp_ms: u64,
}

impl EventBody {
    /// Content hash of the body. The signature is NOT included.
    pub fn hash(&self) -> Hash {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.payload.len() + 6);
        let payload_count = (self.payload.len() as u64).to_le_bytes();
        parts.push(&payload_count);
        for chunk in &self.payload {
            parts.push(chunk);
        }
        let empty: &[u8] = &[];
        parts.push(self.self_parent.as_ref().map(|p| p.as_bytes()).unwrap_or(empty));
        parts.push(self.other_parent.as_ref().map(|p| p.as_bytes()).unwrap_or(empty));
        parts.push(self.creator.as_bytes());
        let index = self.index.to_le_bytes();
        parts.push(&index);
        let ts = self.timestamp_ms.to_le_bytes();
        parts.push(&ts);
        crate::hash_parts("braid.event.id", &parts)
    }
}

/// An event plus its engine-filled decorations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub body: EventBody,
    /// Creator's signature over the body hash. Empty until signed.
    pub signature: Signature,

    // Resolved at insert from the participant table and the store. -1 until
    // then; these compact indices are what travels on the wire.
    pub(crate) creator_id: i64,
    pub(crate) self_parent_index: i64,
    pub(crate) other_parent_creator_id: i64,
    pub(crate) other_parent_index: i64,

    // Coordinate vectors, one entry per participant.
    pub(crate) first_descendants: Vec<Coord>,
    pub(crate) last_ancestors: Vec<Coord>,

    // Consensus decorations, each set once.
    pub(crate) round: Option<i64>,
    pub(crate) round_received: Option<i64>,
    pub(crate) consensus_timestamp: Option<u64>,
}

impl Event {
    /// Create an unsigned event stamped with the local clock.
    pub fn new(
        payload: Vec<Vec<u8>>,
        self_parent: Option<EventId>,
        other_parent: Option<EventId>,
        creator: SigningPublicKey,
        index: i64,
    ) -> Self {
        Self::new_at(payload, self_parent, other_parent, creator, index, now_ms())
    }

    /// Create an unsigned event with an explicit timestamp (wire
    /// reconstruction and tests).
    pub fn new_at(
        payload: Vec<Vec<u8>>,
        self_parent: Option<EventId>,
        other_parent: Option<EventId>,
        creator: SigningPublicKey,
        index: i64,
        timestamp_ms: u64,
    ) -> Self {
        Event {
            body: EventBody {
                payload,
                self_parent,
                other_parent,
                creator,
                index,
                timestamp_ms,
            },
            signature: Signature::empty(),
            creator_id: INDEX_NONE,
            self_parent_index: INDEX_NONE,
            other_parent_creator_id: INDEX_NONE,
            other_parent_index: INDEX_NONE,
            first_descendants: Vec::new(),
            last_ancestors: Vec::new(),
            round: None,
            round_received: None,
            consensus_timestamp: None,
        }
    }

    pub fn id(&self) -> EventId {
        EventId(self.body.hash())
    }

    /// Sign the body hash with the creator's key.
    pub fn sign(&mut self, keypair: &SigningKeypair) {
        self.signature = keypair.sign(&self.body.hash());
    }

    /// Verify the signature against the creator key carried in the body.
    pub fn verify(&self) -> bool {
        !self.signature.is_empty() && self.body.creator.verify(&self.body.hash(), &self.signature)
    }

    /// Loaded events are what backpressure counts: payload-bearing events,
    /// plus every genesis event.
    pub fn is_loaded(&self) -> bool {
        self.body.index == 0 || self.body.payload.iter().any(|p| !p.is_empty())
    }

    pub fn self_parent(&self) -> Option<&EventId> {
        self.body.self_parent.as_ref()
    }

    pub fn other_parent(&self) -> Option<&EventId> {
        self.body.other_parent.as_ref()
    }

    pub fn creator(&self) -> &SigningPublicKey {
        &self.body.creator
    }

    pub fn index(&self) -> i64 {
        self.body.index
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.body.timestamp_ms
    }

    /// Participant id of the creator; `-1` until the event is inserted.
    pub fn creator_id(&self) -> i64 {
        self.creator_id
    }

    pub fn round(&self) -> Option<i64> {
        self.round
    }

    pub fn round_received(&self) -> Option<i64> {
        self.round_received
    }

    pub fn consensus_timestamp(&self) -> Option<u64> {
        self.consensus_timestamp
    }

    pub fn first_descendants(&self) -> &[Coord] {
        &self.first_descendants
    }

    pub fn last_ancestors(&self) -> &[Coord] {
        &self.last_ancestors
    }

    pub(crate) fn set_round(&mut self, round: i64) {
        match self.round {
            None => self.round = Some(round),
            Some(existing) if existing == round => {}
            Some(existing) => {
                tracing::warn!(event = %self.id(), existing, rejected = round,
                    "attempt to revise event round ignored");
            }
        }
    }

    pub(crate) fn set_round_received(&mut self, round: i64) {
        match self.round_received {
            None => self.round_received = Some(round),
            Some(existing) if existing == round => {}
            Some(existing) => {
                tracing::warn!(event = %self.id(), existing, rejected = round,
                    "attempt to revise round-received ignored");
            }
        }
    }

    pub(crate) fn set_consensus_timestamp(&mut self, ts: u64) {
        if self.consensus_timestamp.is_none() {
            self.consensus_timestamp = Some(ts);
        }
    }

    /// Compact gossip form. `None` until the event has been inserted (wire
    /// indices resolved) and signed.
    pub fn to_wire(&self) -> Option<WireEvent> {
        if self.creator_id < 0 {
            return None;
        }
        let (r, s) = self.signature.scalars()?;
        Some(WireEvent {
            body: WireBody {
                payload: self.body.payload.clone(),
                self_parent_index: self.self_parent_index,
                other_parent_creator_id: self.other_parent_creator_id,
                other_parent_index: self.other_parent_index,
                creator_id: self.creator_id,
                index: self.body.index,
                timestamp_ms: self.body.timestamp_ms,
            },
            r,
            s,
        })
    }
}

/// Wire form of an event body: parent hashes replaced by
/// `(creator id, index)` pairs the receiver resolves through its store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBody {
    pub payload: Vec<Vec<u8>>,
    pub self_parent_index: i64,
    pub other_parent_creator_id: i64,
    pub other_parent_index: i64,
    pub creator_id: i64,
    pub index: i64,
    pub timestamp_ms: u64,
}

/// An event as gossiped: compact body plus the signature scalars.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub body: WireBody,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event(payload: Vec<Vec<u8>>, index: i64) -> (SigningKeypair, Event) {
        let kp = SigningKeypair::generate();
        let ev = Event::new_at(payload, None, None, kp.public.clone(), index, 42);
        (kp, ev)
    }

    #[test]
    fn id_is_deterministic() {
        let (_, ev) = test_event(vec![b"tx".to_vec()], 0);
        assert_eq!(ev.id(), ev.id());
    }

    #[test]
    fn id_excludes_signature() {
        let (kp, mut ev) = test_event(vec![b"tx".to_vec()], 0);
        let before = ev.id();
        ev.sign(&kp);
        assert_eq!(before, ev.id());
        assert!(ev.verify());
    }

    #[test]
    fn id_covers_every_body_field() {
        let (_kp, base) = test_event(vec![b"tx".to_vec()], 1);
        let other = EventId([7u8; 32]);

        let mut changed = base.clone();
        changed.body.payload = vec![b"ty".to_vec()];
        assert_ne!(base.id(), changed.id());

        let mut changed = base.clone();
        changed.body.self_parent = Some(other);
        assert_ne!(base.id(), changed.id());

        let mut changed = base.clone();
        changed.body.other_parent = Some(other);
        assert_ne!(base.id(), changed.id());

        let mut changed = base.clone();
        changed.body.index = 2;
        assert_ne!(base.id(), changed.id());

        let mut changed = base.clone();
        changed.body.timestamp_ms = 43;
        assert_ne!(base.id(), changed.id());

        let mut changed = base.clone();
        changed.body.creator = SigningKeypair::generate().public;
        assert_ne!(base.id(), changed.id());
    }

    #[test]
    fn payload_chunking_is_unambiguous() {
        let kp = SigningKeypair::generate();
        let a = Event::new_at(
            vec![b"AB".to_vec(), b"C".to_vec()],
            None,
            None,
            kp.public.clone(),
            0,
            1,
        );
        let b = Event::new_at(
            vec![b"A".to_vec(), b"BC".to_vec()],
            None,
            None,
            kp.public.clone(),
            0,
            1,
        );
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn verify_rejects_unsigned_and_foreign_signature() {
        let (_, ev) = test_event(vec![], 0);
        assert!(!ev.verify());

        let (_, mut ev) = test_event(vec![], 0);
        let stranger = SigningKeypair::generate();
        ev.sign(&stranger); // signed by someone other than body.creator
        assert!(!ev.verify());
    }

    #[test]
    fn loaded_rules() {
        // Genesis counts as loaded even with an empty payload.
        let (_, genesis) = test_event(vec![], 0);
        assert!(genesis.is_loaded());

        let (_, empty) = test_event(vec![], 3);
        assert!(!empty.is_loaded());

        let (_, chunked_empty) = test_event(vec![vec![]], 3);
        assert!(!chunked_empty.is_loaded());

        let (_, loaded) = test_event(vec![b"tx".to_vec()], 3);
        assert!(loaded.is_loaded());
    }

    #[test]
    fn coord_sentinels() {
        assert_eq!(Coord::none().index, INDEX_NONE);
        assert_eq!(Coord::unseen().index, INDEX_UNSEEN);
        assert!(Coord::none().id.is_none());
    }

    #[test]
    fn round_is_set_once() {
        let (_, mut ev) = test_event(vec![], 0);
        ev.set_round(2);
        ev.set_round(5);
        assert_eq!(ev.round(), Some(2));
    }

    #[test]
    fn to_wire_requires_resolution_and_signature() {
        let (kp, mut ev) = test_event(vec![], 0);
        assert!(ev.to_wire().is_none()); // unresolved, unsigned
        ev.sign(&kp);
        assert!(ev.to_wire().is_none()); // still unresolved
        ev.creator_id = 0;
        let wire = ev.to_wire().unwrap();
        assert_eq!(wire.body.index, 0);
        assert_eq!(wire.body.self_parent_index, INDEX_NONE);
        assert_eq!(
            Signature::from_scalars(wire.r, wire.s),
            ev.signature
        );
    }

    #[test]
    fn wire_event_serde_roundtrip() {
        let (kp, mut ev) = test_event(vec![b"tx".to_vec()], 0);
        ev.sign(&kp);
        ev.creator_id = 1;
        let wire = ev.to_wire().unwrap();
        let bytes = crate::serialize(&wire).unwrap();
        let back: WireEvent = crate::deserialize(&bytes).unwrap();
        assert_eq!(wire, back);
    }
}
