//! Node shell around the consensus engine.
//!
//! The engine itself is single-threaded cooperative: all graph mutations
//! happen on one consensus task. Gossip tasks hand validated events to a
//! bounded inbound channel; the consensus task drains it, inserting events
//! one by one, and runs a sweep whenever the queue empties. Readers never
//! touch the engine; they subscribe to a `watch` channel carrying an
//! append-only `Arc` snapshot of the consensus order.
//!
//! Backpressure: the bounded channel throttles senders, and once the
//! engine's loaded-but-unordered count reaches `pending_cap` the loop runs
//! a sweep before accepting more input.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::NodeConfig;
use crate::consensus::engine::{ConsensusError, ConsensusEvent, Hashgraph, SweepStats};
use crate::consensus::event::{Event, EventId};
use crate::storage::Store;

/// Commands accepted by the consensus task.
pub enum NodeCommand {
    /// Insert a remote event. Rejections are logged, not returned; the
    /// gossip layer learns about missing parents from `known` deltas.
    Insert(Box<Event>),
    /// Create, sign, and insert a local event.
    Submit {
        payload: Vec<Vec<u8>>,
        other_parent: Option<EventId>,
        reply: oneshot::Sender<Result<Event, ConsensusError>>,
    },
    /// Run one sweep now and report its counters.
    Sweep {
        reply: oneshot::Sender<Result<SweepStats, ConsensusError>>,
    },
    /// Report per-participant event counts (for gossip deltas).
    Known {
        reply: oneshot::Sender<BTreeMap<usize, i64>>,
    },
}

/// Handle used by gossip and query layers to talk to the consensus task.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    consensus: watch::Receiver<Arc<Vec<ConsensusEvent>>>,
}

impl NodeHandle {
    /// Enqueue a remote event. Waits when the inbound channel is full.
    pub async fn insert(&self, event: Event) -> Result<(), ConsensusError> {
        self.commands
            .send(NodeCommand::Insert(Box::new(event)))
            .await
            .map_err(|_| ConsensusError::NotReady)
    }

    /// Create and insert a local event; returns it as stored.
    pub async fn submit(
        &self,
        payload: Vec<Vec<u8>>,
        other_parent: Option<EventId>,
    ) -> Result<Event, ConsensusError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(NodeCommand::Submit {
                payload,
                other_parent,
                reply,
            })
            .await
            .map_err(|_| ConsensusError::NotReady)?;
        response.await.map_err(|_| ConsensusError::NotReady)?
    }

    /// Run one sweep and return its counters.
    pub async fn sweep(&self) -> Result<SweepStats, ConsensusError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(NodeCommand::Sweep { reply })
            .await
            .map_err(|_| ConsensusError::NotReady)?;
        response.await.map_err(|_| ConsensusError::NotReady)?
    }

    /// Per-participant event counts, as gossip needs them.
    pub async fn known(&self) -> Result<BTreeMap<usize, i64>, ConsensusError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(NodeCommand::Known { reply })
            .await
            .map_err(|_| ConsensusError::NotReady)?;
        response.await.map_err(|_| ConsensusError::NotReady)
    }

    /// Current snapshot of the consensus order. Snapshots are append-only:
    /// a later snapshot is always an extension of an earlier one.
    pub fn consensus_snapshot(&self) -> Arc<Vec<ConsensusEvent>> {
        self.consensus.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn watch_consensus(&self) -> watch::Receiver<Arc<Vec<ConsensusEvent>>> {
        self.consensus.clone()
    }
}

/// The consensus task: owns the engine and serializes all mutations.
pub struct ConsensusNode<S: Store> {
    engine: Hashgraph<S>,
    config: NodeConfig,
    snapshot: Vec<ConsensusEvent>,
}

impl<S: Store + Send + 'static> ConsensusNode<S> {
    /// Spawn the consensus task. Returns the handle and the task's join
    /// handle; the task runs until every `NodeHandle` is dropped or a
    /// corruption error halts it.
    pub fn spawn(engine: Hashgraph<S>, config: NodeConfig) -> (NodeHandle, tokio::task::JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (watch_tx, watch_rx) = watch::channel(Arc::new(Vec::new()));
        let node = ConsensusNode {
            engine,
            config,
            snapshot: Vec::new(),
        };
        let task = tokio::spawn(node.run(command_rx, watch_tx));
        (
            NodeHandle {
                commands: command_tx,
                consensus: watch_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<NodeCommand>,
        watch_tx: watch::Sender<Arc<Vec<ConsensusEvent>>>,
    ) {
        let mut dirty = false;
        loop {
            // Drain bursts without sweeping; sweep once the queue is empty
            // or backpressure demands it.
            let command = match commands.try_recv() {
                Ok(command) => command,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if dirty {
                        if self.sweep_and_publish(&watch_tx).is_err() {
                            break;
                        }
                        dirty = false;
                    }
                    match commands.recv().await {
                        Some(command) => command,
                        None => break,
                    }
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            };

            match command {
                NodeCommand::Insert(event) => {
                    match self.engine.insert(*event) {
                        Ok(()) => dirty = true,
                        Err(ConsensusError::AlreadyInserted) => {}
                        Err(e @ ConsensusError::Corruption(_))
                        | Err(e @ ConsensusError::Store(_)) => {
                            tracing::error!(error = %e, "store failure on insert, halting");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "rejected inbound event");
                        }
                    }
                    if self.engine.pending_loaded_events() >= self.config.pending_cap {
                        if self.sweep_and_publish(&watch_tx).is_err() {
                            break;
                        }
                        dirty = false;
                    }
                }
                NodeCommand::Submit {
                    payload,
                    other_parent,
                    reply,
                } => {
                    let result = self.engine.submit(payload, other_parent);
                    if result.is_ok() {
                        dirty = true;
                    }
                    let _ = reply.send(result);
                }
                NodeCommand::Sweep { reply } => {
                    let result = self.sweep_and_publish(&watch_tx);
                    let halt = result.is_err();
                    let _ = reply.send(result);
                    if halt {
                        break;
                    }
                    dirty = false;
                }
                NodeCommand::Known { reply } => {
                    let _ = reply.send(self.engine.known());
                }
            }
        }
        tracing::info!("consensus task stopped");
    }

    /// Run one sweep; on progress, extend and publish the snapshot.
    /// Errors here are fatal for the task (spec: corruption halts).
    fn sweep_and_publish(
        &mut self,
        watch_tx: &watch::Sender<Arc<Vec<ConsensusEvent>>>,
    ) -> Result<SweepStats, ConsensusError> {
        let stats = match self.engine.progress() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "sweep failed, halting consensus task");
                return Err(e);
            }
        };
        if stats.ordered > 0 {
            for entry in self.engine.consensus_stream(self.snapshot.len()) {
                self.snapshot.push(entry?);
            }
            let _ = watch_tx.send(Arc::new(self.snapshot.clone()));
        }
        Ok(stats)
    }
}
