//! Round bookkeeping: which events belong to a round, which of them are
//! witnesses, and how witness fame has been decided.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::event::EventId;

/// Fame of a witness. Starts [`Undecided`](Fame::Undecided) and is set
/// exactly once by virtual voting; a decided value is never revised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fame {
    Undecided,
    Famous,
    NotFamous,
}

impl Fame {
    pub fn is_decided(self) -> bool {
        self != Fame::Undecided
    }
}

/// Per-event entry in a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEvent {
    pub witness: bool,
    pub fame: Fame,
}

/// Events assigned to one round.
///
/// Keyed by event id in a `BTreeMap` so iteration order is deterministic
/// across engines; fame voting and ordering must not depend on map
/// iteration accidents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoundInfo {
    events: BTreeMap<EventId, RoundEvent>,
}

impl RoundInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event in this round. Idempotent: a re-swept event keeps
    /// its existing entry (and any decided fame).
    pub fn add_event(&mut self, id: EventId, witness: bool) {
        self.events.entry(id).or_insert(RoundEvent {
            witness,
            fame: Fame::Undecided,
        });
    }

    /// Decide a witness's fame. Set-once: a decided value is never
    /// overwritten, and a conflicting second decision is logged and dropped.
    pub fn set_fame(&mut self, id: &EventId, fame: Fame) {
        match self.events.get_mut(id) {
            Some(entry) if !entry.fame.is_decided() => entry.fame = fame,
            Some(entry) if entry.fame == fame => {}
            Some(entry) => {
                tracing::warn!(event = %id, current = ?entry.fame, rejected = ?fame,
                    "attempt to revise decided fame ignored");
            }
            None => {
                tracing::warn!(event = %id, "set_fame for event not in round");
            }
        }
    }

    pub fn get(&self, id: &EventId) -> Option<RoundEvent> {
        self.events.get(id).copied()
    }

    /// Witness ids, in id order.
    pub fn witnesses(&self) -> Vec<EventId> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Witnesses decided famous, in id order.
    pub fn famous_witnesses(&self) -> Vec<EventId> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness && e.fame == Fame::Famous)
            .map(|(id, _)| *id)
            .collect()
    }

    /// True once the given event's fame is decided.
    pub fn is_decided_event(&self, id: &EventId) -> bool {
        self.events
            .get(id)
            .map(|e| e.fame.is_decided())
            .unwrap_or(false)
    }

    /// True once every witness in the round has decided fame.
    pub fn is_decided(&self) -> bool {
        self.events
            .values()
            .filter(|e| e.witness)
            .all(|e| e.fame.is_decided())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> EventId {
        EventId([byte; 32])
    }

    #[test]
    fn add_event_is_idempotent() {
        let mut info = RoundInfo::new();
        info.add_event(id(1), true);
        info.set_fame(&id(1), Fame::Famous);
        // Re-adding (a re-swept event) must not reset decided fame.
        info.add_event(id(1), true);
        assert_eq!(info.get(&id(1)).unwrap().fame, Fame::Famous);
    }

    #[test]
    fn fame_is_set_once() {
        let mut info = RoundInfo::new();
        info.add_event(id(1), true);
        info.set_fame(&id(1), Fame::NotFamous);
        info.set_fame(&id(1), Fame::Famous);
        assert_eq!(info.get(&id(1)).unwrap().fame, Fame::NotFamous);
    }

    #[test]
    fn witnesses_filters_non_witnesses() {
        let mut info = RoundInfo::new();
        info.add_event(id(1), true);
        info.add_event(id(2), false);
        info.add_event(id(3), true);
        assert_eq!(info.witnesses(), vec![id(1), id(3)]);
    }

    #[test]
    fn decided_requires_all_witnesses() {
        let mut info = RoundInfo::new();
        info.add_event(id(1), true);
        info.add_event(id(2), true);
        info.add_event(id(3), false); // non-witness never blocks decision
        assert!(!info.is_decided());
        info.set_fame(&id(1), Fame::Famous);
        assert!(!info.is_decided());
        info.set_fame(&id(2), Fame::NotFamous);
        assert!(info.is_decided());
        assert_eq!(info.famous_witnesses(), vec![id(1)]);
    }

    #[test]
    fn empty_round_is_decided() {
        assert!(RoundInfo::new().is_decided());
        assert!(RoundInfo::new().famous_witnesses().is_empty());
    }
}
