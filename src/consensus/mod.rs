//! # Hashgraph consensus: virtual voting over an event graph
//!
//! Consensus is computed locally from the gossiped graph: no ballots, no
//! leaders, no extra protocol messages.
//!
//! ## Design Principles
//!
//! 1. **The graph is the protocol.** Each participant appends events with
//!    two parents: its own prior event and one learned from a peer. Every
//!    relation the protocol needs (ancestor, see, strongly-see) is derived
//!    from this topology alone.
//!
//! 2. **Virtual voting.** Witnesses (the first event a participant creates
//!    in a round) are elected *famous* by counting how later witnesses
//!    would have voted, had votes been sent. All participants reach the
//!    same verdict because they evaluate the same graph.
//!
//! 3. **Coin rounds for liveness.** Every `coin_round_interval`-th voting
//!    round draws its vote from the witness's own signature bits, so an
//!    adversary maintaining a perfect split cannot stall fame forever.
//!
//! 4. **Deterministic total order.** Famous witnesses assign each event a
//!    round-received and a median consensus timestamp; remaining ties break
//!    on a signature whitened with witness-derived entropy the attacker
//!    cannot steer.
//!
//! ## How It Works
//!
//! ```text
//! Per inserted event:
//!   1. Validate: signature, parents present, chain index, no fork
//!   2. Index coordinates: lastAncestors / firstDescendants per participant
//! Per sweep (progress()):
//!   3. divide_rounds  — assign each new event a round, flag witnesses
//!   4. decide_fame    — virtual voting over undecided witnesses
//!   5. find_order     — round-received, median timestamp, total order
//! ```

pub mod engine;
pub mod event;
pub mod peers;
pub mod rounds;
