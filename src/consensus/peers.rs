//! The fixed participant table.
//!
//! The peer set is immutable for the lifetime of the engine (membership
//! change is a host concern). Each public key is assigned a stable id in
//! `[0, n)` in construction order; all coordinate vectors are indexed by
//! this id.

use std::collections::HashMap;

use crate::crypto::keys::SigningPublicKey;

/// The participant set, fixed at engine start.
#[derive(Clone, Debug)]
pub struct Peers {
    keys: Vec<SigningPublicKey>,
    by_hex: HashMap<String, usize>,
}

impl Peers {
    /// Build the table from the participants' public keys. Ids are assigned
    /// in the order given; every engine in the network must use the same
    /// order. Duplicate keys keep their first id.
    pub fn new(keys: Vec<SigningPublicKey>) -> Self {
        let mut by_hex = HashMap::with_capacity(keys.len());
        for (id, key) in keys.iter().enumerate() {
            by_hex.entry(key.to_hex()).or_insert(id);
        }
        Peers { keys, by_hex }
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Strictly more than two thirds of the participants: `2n/3 + 1`.
    pub fn super_majority(&self) -> usize {
        (self.keys.len() * 2) / 3 + 1
    }

    /// Resolve a public key to its participant id.
    pub fn id_of(&self, key: &SigningPublicKey) -> Option<usize> {
        self.by_hex.get(&key.to_hex()).copied()
    }

    /// Resolve a participant id to its public key.
    pub fn key_of(&self, id: usize) -> Option<&SigningPublicKey> {
        self.keys.get(id)
    }

    /// Iterate `(id, key)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SigningPublicKey)> {
        self.keys.iter().enumerate()
    }
}
