//! Event and round storage.
//!
//! Provides the `Store` trait the engine reads the graph through, the
//! in-memory reference implementation, and a sled-backed implementation for
//! hosts that want the graph to survive restarts. Durability guarantees
//! beyond `flush` are a host concern.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::consensus::event::{Event, EventId};
use crate::consensus::rounds::RoundInfo;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store invariant broken: {0}")]
    Corruption(String),
}

/// Storage contract for the consensus engine.
///
/// Implementations only hold already-validated events; all structural
/// checks happen in the engine before `set_event`. `set_event` must be
/// idempotent on identical content and is also used to persist decoration
/// updates to events already present.
pub trait Store {
    fn get_event(&self, id: &EventId) -> Result<Event, StoreError>;
    fn set_event(&mut self, event: Event) -> Result<(), StoreError>;
    fn contains(&self, id: &EventId) -> bool;

    /// All event ids by `participant`, in creator-index order.
    fn participant_events(&self, participant: usize) -> Result<Vec<EventId>, StoreError>;
    /// The id of `participant`'s event at `index`.
    fn participant_event(&self, participant: usize, index: i64) -> Result<EventId, StoreError>;
    /// The latest event by `participant`, if any.
    fn last_from(&self, participant: usize) -> Result<Option<EventId>, StoreError>;
    /// Highest index observed per participant id; `-1` when none.
    fn known(&self) -> BTreeMap<usize, i64>;

    /// Number of rounds created so far.
    fn rounds(&self) -> i64;
    fn get_round(&self, round: i64) -> Result<RoundInfo, StoreError>;
    fn set_round(&mut self, round: i64, info: RoundInfo) -> Result<(), StoreError>;

    /// Ordered ids of events that reached consensus.
    fn consensus_events(&self) -> Vec<EventId>;
    fn add_consensus_event(&mut self, id: EventId) -> Result<(), StoreError>;

    /// Persist the engine's sweep progress marker (the undecided rounds).
    fn save_progress(&mut self, undecided_rounds: &[i64]) -> Result<(), StoreError>;
    fn load_progress(&self) -> Result<Vec<i64>, StoreError>;

    /// Make everything written so far durable. The engine calls this at the
    /// end of each sweep; in-memory stores treat it as a no-op.
    fn flush(&mut self) -> Result<(), StoreError>;
}

// ── In-memory reference store ──

/// The reference store: everything lives in maps, nothing is evicted.
///
/// Events are authoritative here: dropping one would silently corrupt the
/// coordinate index of later events, so no cache bound applies (the bounded
/// LRU belongs in front of a persistent backend, see [`SledStore`]).
#[derive(Debug, Default)]
pub struct InMemStore {
    events: HashMap<EventId, Event>,
    participant_events: BTreeMap<usize, Vec<EventId>>,
    rounds: BTreeMap<i64, RoundInfo>,
    consensus_events: Vec<EventId>,
    undecided_rounds: Vec<i64>,
}

impl InMemStore {
    pub fn new(participants: usize) -> Self {
        let mut store = InMemStore::default();
        for p in 0..participants {
            store.participant_events.insert(p, Vec::new());
        }
        store
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Store for InMemStore {
    fn get_event(&self, id: &EventId) -> Result<Event, StoreError> {
        self.events.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn set_event(&mut self, event: Event) -> Result<(), StoreError> {
        let id = event.id();
        if !self.events.contains_key(&id) {
            let creator = usize::try_from(event.creator_id())
                .map_err(|_| StoreError::Corruption("event stored without creator id".into()))?;
            let chain = self.participant_events.entry(creator).or_default();
            if event.index() != chain.len() as i64 {
                return Err(StoreError::Corruption(format!(
                    "event index {} does not extend chain of length {}",
                    event.index(),
                    chain.len()
                )));
            }
            chain.push(id);
        }
        self.events.insert(id, event);
        Ok(())
    }

    fn contains(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }

    fn participant_events(&self, participant: usize) -> Result<Vec<EventId>, StoreError> {
        self.participant_events
            .get(&participant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn participant_event(&self, participant: usize, index: i64) -> Result<EventId, StoreError> {
        let chain = self
            .participant_events
            .get(&participant)
            .ok_or(StoreError::NotFound)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| chain.get(i))
            .copied()
            .ok_or(StoreError::NotFound)
    }

    fn last_from(&self, participant: usize) -> Result<Option<EventId>, StoreError> {
        Ok(self
            .participant_events
            .get(&participant)
            .ok_or(StoreError::NotFound)?
            .last()
            .copied())
    }

    fn known(&self) -> BTreeMap<usize, i64> {
        self.participant_events
            .iter()
            .map(|(p, chain)| (*p, chain.len() as i64 - 1))
            .collect()
    }

    fn rounds(&self) -> i64 {
        self.rounds.len() as i64
    }

    fn get_round(&self, round: i64) -> Result<RoundInfo, StoreError> {
        self.rounds.get(&round).cloned().ok_or(StoreError::NotFound)
    }

    fn set_round(&mut self, round: i64, info: RoundInfo) -> Result<(), StoreError> {
        self.rounds.insert(round, info);
        Ok(())
    }

    fn consensus_events(&self) -> Vec<EventId> {
        self.consensus_events.clone()
    }

    fn add_consensus_event(&mut self, id: EventId) -> Result<(), StoreError> {
        self.consensus_events.push(id);
        Ok(())
    }

    fn save_progress(&mut self, undecided_rounds: &[i64]) -> Result<(), StoreError> {
        self.undecided_rounds = undecided_rounds.to_vec();
        Ok(())
    }

    fn load_progress(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self.undecided_rounds.clone())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Sled-backed store ──

/// Sled-backed store: the same contract over on-disk trees, with a bounded
/// LRU read cache in front of the event tree.
pub struct SledStore {
    #[allow(dead_code)]
    db: sled::Db,
    events: sled::Tree,
    participant_events: sled::Tree,
    rounds: sled::Tree,
    consensus: sled::Tree,
    meta: sled::Tree,
    cache: Mutex<lru::LruCache<EventId, Event>>,
}

impl SledStore {
    /// Open or create a sled database at the given path.
    pub fn open(path: &std::path::Path, cache_size: usize) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(io_err)?;
        Self::from_db(db, cache_size)
    }

    /// Open a temporary sled database (for testing).
    pub fn open_temporary(cache_size: usize) -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(io_err)?;
        Self::from_db(db, cache_size)
    }

    fn from_db(db: sled::Db, cache_size: usize) -> Result<Self, StoreError> {
        let events = db.open_tree("events").map_err(io_err)?;
        let participant_events = db.open_tree("participant_events").map_err(io_err)?;
        let rounds = db.open_tree("rounds").map_err(io_err)?;
        let consensus = db.open_tree("consensus").map_err(io_err)?;
        let meta = db.open_tree("meta").map_err(io_err)?;
        // max(1) keeps the capacity non-zero; a panic here is unreachable.
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("non-zero cache capacity");
        Ok(SledStore {
            db,
            events,
            participant_events,
            rounds,
            consensus,
            meta,
            cache: Mutex::new(lru::LruCache::new(capacity)),
        })
    }

    fn chain_key(participant: usize, index: i64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&(participant as u64).to_be_bytes());
        key[8..].copy_from_slice(&(index as u64).to_be_bytes());
        key
    }

    fn chain_len(&self, participant: usize) -> Result<i64, StoreError> {
        let prefix = (participant as u64).to_be_bytes();
        let mut last: i64 = -1;
        for item in self.participant_events.scan_prefix(prefix) {
            let (key, _) = item.map_err(io_err)?;
            if key.len() == 16 {
                let mut idx = [0u8; 8];
                idx.copy_from_slice(&key[8..]);
                last = last.max(u64::from_be_bytes(idx) as i64);
            }
        }
        Ok(last)
    }
}

fn io_err(e: sled::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn ser_err(e: bincode::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

impl Store for SledStore {
    fn get_event(&self, id: &EventId) -> Result<Event, StoreError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(ev) = cache.get(id) {
                return Ok(ev.clone());
            }
        }
        let bytes = self
            .events
            .get(id.as_bytes())
            .map_err(io_err)?
            .ok_or(StoreError::NotFound)?;
        let event: Event = crate::deserialize(&bytes).map_err(ser_err)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(*id, event.clone());
        }
        Ok(event)
    }

    fn set_event(&mut self, event: Event) -> Result<(), StoreError> {
        let id = event.id();
        let known = self.events.contains_key(id.as_bytes()).map_err(io_err)?;
        if !known {
            let creator = usize::try_from(event.creator_id())
                .map_err(|_| StoreError::Corruption("event stored without creator id".into()))?;
            let expected = self.chain_len(creator)? + 1;
            if event.index() != expected {
                return Err(StoreError::Corruption(format!(
                    "event index {} does not extend chain ending at {}",
                    event.index(),
                    expected - 1
                )));
            }
            self.participant_events
                .insert(Self::chain_key(creator, event.index()), id.as_bytes())
                .map_err(io_err)?;
        }
        let bytes = crate::serialize(&event).map_err(ser_err)?;
        self.events.insert(id.as_bytes(), bytes).map_err(io_err)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(id, event);
        }
        Ok(())
    }

    fn contains(&self, id: &EventId) -> bool {
        self.events.contains_key(id.as_bytes()).unwrap_or(false)
    }

    fn participant_events(&self, participant: usize) -> Result<Vec<EventId>, StoreError> {
        let prefix = (participant as u64).to_be_bytes();
        let mut ids = Vec::new();
        for item in self.participant_events.scan_prefix(prefix) {
            let (_, value) = item.map_err(io_err)?;
            let bytes: crate::Hash = value
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Corruption("malformed chain entry".into()))?;
            ids.push(EventId(bytes));
        }
        Ok(ids)
    }

    fn participant_event(&self, participant: usize, index: i64) -> Result<EventId, StoreError> {
        if index < 0 {
            return Err(StoreError::NotFound);
        }
        let value = self
            .participant_events
            .get(Self::chain_key(participant, index))
            .map_err(io_err)?
            .ok_or(StoreError::NotFound)?;
        let bytes: crate::Hash = value
            .as_ref()
            .try_into()
            .map_err(|_| StoreError::Corruption("malformed chain entry".into()))?;
        Ok(EventId(bytes))
    }

    fn last_from(&self, participant: usize) -> Result<Option<EventId>, StoreError> {
        let last = self.chain_len(participant)?;
        if last < 0 {
            return Ok(None);
        }
        self.participant_event(participant, last).map(Some)
    }

    fn known(&self) -> BTreeMap<usize, i64> {
        let mut known = BTreeMap::new();
        for item in self.participant_events.iter() {
            let Ok((key, _)) = item else { continue };
            if key.len() != 16 {
                continue;
            }
            let mut p = [0u8; 8];
            p.copy_from_slice(&key[..8]);
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&key[8..]);
            let participant = u64::from_be_bytes(p) as usize;
            let index = u64::from_be_bytes(idx) as i64;
            let entry = known.entry(participant).or_insert(-1);
            *entry = (*entry).max(index);
        }
        known
    }

    fn rounds(&self) -> i64 {
        self.rounds.len() as i64
    }

    fn get_round(&self, round: i64) -> Result<RoundInfo, StoreError> {
        if round < 0 {
            return Err(StoreError::NotFound);
        }
        let bytes = self
            .rounds
            .get((round as u64).to_be_bytes())
            .map_err(io_err)?
            .ok_or(StoreError::NotFound)?;
        crate::deserialize(&bytes).map_err(ser_err)
    }

    fn set_round(&mut self, round: i64, info: RoundInfo) -> Result<(), StoreError> {
        let bytes = crate::serialize(&info).map_err(ser_err)?;
        self.rounds
            .insert((round as u64).to_be_bytes(), bytes)
            .map_err(io_err)?;
        Ok(())
    }

    fn consensus_events(&self) -> Vec<EventId> {
        let mut ids = Vec::new();
        for item in self.consensus.iter() {
            let Ok((_, value)) = item else { continue };
            if let Ok(bytes) = <&[u8] as TryInto<crate::Hash>>::try_into(value.as_ref()) {
                ids.push(EventId(bytes));
            }
        }
        ids
    }

    fn add_consensus_event(&mut self, id: EventId) -> Result<(), StoreError> {
        let seq = self.consensus.len() as u64;
        self.consensus
            .insert(seq.to_be_bytes(), id.as_bytes())
            .map_err(io_err)?;
        Ok(())
    }

    fn save_progress(&mut self, undecided_rounds: &[i64]) -> Result<(), StoreError> {
        let bytes = crate::serialize(&undecided_rounds.to_vec()).map_err(ser_err)?;
        self.meta
            .insert(b"undecided_rounds", bytes)
            .map_err(io_err)?;
        Ok(())
    }

    fn load_progress(&self) -> Result<Vec<i64>, StoreError> {
        match self.meta.get(b"undecided_rounds").map_err(io_err)? {
            Some(bytes) => crate::deserialize(&bytes).map_err(ser_err),
            None => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.db.flush().map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::rounds::Fame;
    use crate::crypto::keys::SigningKeypair;

    fn stored_event(creator_id: i64, index: i64, payload: &[u8]) -> Event {
        let kp = SigningKeypair::generate();
        let mut ev = Event::new_at(
            vec![payload.to_vec()],
            None,
            None,
            kp.public.clone(),
            index,
            1_000 + index as u64,
        );
        ev.sign(&kp);
        ev.creator_id = creator_id;
        ev
    }

    fn exercise_store<S: Store>(mut store: S) {
        let e0 = stored_event(0, 0, b"a");
        let id0 = e0.id();
        assert!(!store.contains(&id0));
        store.set_event(e0.clone()).unwrap();
        assert!(store.contains(&id0));

        // Idempotent on identical content.
        store.set_event(e0.clone()).unwrap();
        assert_eq!(store.participant_events(0).unwrap(), vec![id0]);

        let fetched = store.get_event(&id0).unwrap();
        assert_eq!(fetched.id(), id0);
        assert_eq!(fetched.timestamp_ms(), e0.timestamp_ms());

        assert!(matches!(
            store.get_event(&EventId([9u8; 32])),
            Err(StoreError::NotFound)
        ));

        assert_eq!(store.participant_event(0, 0).unwrap(), id0);
        assert!(store.participant_event(0, 1).is_err());
        assert_eq!(store.last_from(0).unwrap(), Some(id0));
        assert_eq!(store.known().get(&0), Some(&0));

        // A gap in the chain is a corruption, not a valid write.
        let gapped = stored_event(0, 5, b"gap");
        assert!(matches!(
            store.set_event(gapped),
            Err(StoreError::Corruption(_))
        ));

        // Rounds.
        assert_eq!(store.rounds(), 0);
        let mut info = RoundInfo::new();
        info.add_event(id0, true);
        store.set_round(0, info).unwrap();
        assert_eq!(store.rounds(), 1);
        let mut round0 = store.get_round(0).unwrap();
        round0.set_fame(&id0, Fame::Famous);
        store.set_round(0, round0).unwrap();
        assert_eq!(store.get_round(0).unwrap().famous_witnesses(), vec![id0]);
        assert!(store.get_round(7).is_err());

        // Consensus list and progress marker.
        assert!(store.consensus_events().is_empty());
        store.add_consensus_event(id0).unwrap();
        assert_eq!(store.consensus_events(), vec![id0]);

        store.save_progress(&[2, 3]).unwrap();
        assert_eq!(store.load_progress().unwrap(), vec![2, 3]);

        store.flush().unwrap();
    }

    #[test]
    fn inmem_store_contract() {
        exercise_store(InMemStore::new(2));
    }

    #[test]
    fn sled_store_contract() {
        exercise_store(SledStore::open_temporary(16).unwrap());
    }

    #[test]
    fn inmem_decoration_update_keeps_chain() {
        let mut store = InMemStore::new(1);
        let ev = stored_event(0, 0, b"a");
        let id = ev.id();
        store.set_event(ev).unwrap();

        let mut decorated = store.get_event(&id).unwrap();
        decorated.set_round(3);
        store.set_event(decorated).unwrap();

        assert_eq!(store.get_event(&id).unwrap().round(), Some(3));
        assert_eq!(store.participant_events(0).unwrap().len(), 1);
    }

    #[test]
    fn sled_store_roundtrips_through_trees() {
        let mut store = SledStore::open_temporary(16).unwrap();
        let e0 = stored_event(1, 0, b"x");
        let id = e0.id();
        store.set_event(e0).unwrap();
        store.flush().unwrap();

        // Cache bypass: a fresh read must come back from the tree.
        assert_eq!(store.get_event(&id).unwrap().id(), id);
        assert_eq!(store.known().get(&1), Some(&0));
    }

    #[test]
    fn unknown_participant_chain_is_not_found() {
        let store = InMemStore::new(1);
        assert!(matches!(
            store.participant_events(5),
            Err(StoreError::NotFound)
        ));
        assert!(store.last_from(5).is_err());
    }
}
