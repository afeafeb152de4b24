//! # Braid
//!
//! A Byzantine-fault-tolerant consensus engine that derives a deterministic
//! total order of events from a gossiped, append-only event graph:
//! - **No extra voting messages** — consensus is computed locally from the
//!   graph topology (virtual voting)
//! - **Two-parent events** — each event references its creator's prior event
//!   and one event learned from another participant
//! - **Round-based fame** — witnesses are elected famous by deterministic
//!   majorities, with periodic coin rounds to break split votes
//! - **Total order** — famous witnesses assign a round-received and a median
//!   consensus timestamp; ties break on a whitened signature
//!
//! The crate is a library: gossip, persistence durability, and key custody
//! are host concerns reached through the interfaces in [`storage`],
//! [`crypto::keys`], and [`node`].

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod node;
pub mod storage;

/// Protocol constants
pub mod constants {
    /// Interval between coin rounds during fame voting.
    ///
    /// Every `c`-th voting round draws its vote from event-content entropy
    /// instead of deciding, so a Byzantine split vote cannot stall forever.
    pub const COIN_ROUND_INTERVAL: i64 = 10;
    /// Smallest usable coin-round interval; below this every voting round
    /// would be a coin round and no fame could ever be decided.
    pub const MIN_COIN_ROUND_INTERVAL: i64 = 2;
    /// Default capacity of the read cache fronting a persistent store.
    pub const DEFAULT_EVENT_CACHE: usize = 1_000;
    /// Default bound on loaded-but-unordered events before the node stops
    /// draining inbound gossip.
    pub const DEFAULT_PENDING_CAP: usize = 4_096;
    /// Default capacity of the inbound event channel.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
    /// Compressed SEC1 secp256k1 public key size in bytes.
    pub const PUBLIC_KEY_BYTES: usize = 33;
    /// Fixed-width `r ‖ s` ECDSA signature size in bytes.
    pub const SIGNATURE_BYTES: usize = 64;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all braid domains use ASCII). Panics at
/// runtime if the domain is not valid UTF-8 — this is a programming error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Compute a domain-separated BLAKE3 hash of length-prefixed parts.
///
/// Each part is prefixed with its length as a little-endian u64, preventing
/// ambiguous concatenation (e.g., `["AB","C"]` vs `["A","BC"]`).
pub fn hash_parts(domain: &str, parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Serialize a value with the crate's canonical codec.
pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

/// Deserialize a value with the crate's canonical codec.
pub fn deserialize<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_domain_separates() {
        let a = hash_domain(b"braid.test.a", b"data");
        let b = hash_domain(b"braid.test.b", b"data");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_parts_length_prefixed() {
        let a = hash_parts("braid.test", &[b"AB", b"C"]);
        let b = hash_parts("braid.test", &[b"A", b"BC"]);
        assert_ne!(a, b);
    }

    #[test]
    fn serialize_roundtrip() {
        let v: Vec<u64> = vec![1, 2, 3];
        let bytes = serialize(&v).unwrap();
        let back: Vec<u64> = deserialize(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
