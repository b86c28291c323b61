//! Replica actor: serializes every handler behind one lock and dispatches
//! side effects after releasing it

use parking_lot::Mutex;
use pbftchain_core::{PbftResult, ReplicaId, View};
use pbftchain_ledger::{Block, Transaction};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::message::PeerMessage;
use crate::state::{ConsensusEvent, Outbound, Outcome, ReplicaState, Step};
use crate::transport::Transport;

/// Snapshot of a replica for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub replica_id: ReplicaId,
    pub view: View,
    pub leader: ReplicaId,
    pub is_leader: bool,
    pub ledger_length: usize,
    pub tail_index: u64,
    pub tail_hash: String,
    pub pending_transactions: usize,
    pub replicas: usize,
    pub quorum_size: usize,
}

/// PBFT engine for one replica
pub struct PbftEngine {
    id: ReplicaId,
    state: Mutex<ReplicaState>,
    transport: Arc<dyn Transport>,
    event_tx: Option<mpsc::Sender<ConsensusEvent>>,
}

impl PbftEngine {
    pub fn new(state: ReplicaState, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: state.id(),
            state: Mutex::new(state),
            transport,
            event_tx: None,
        }
    }

    /// Set event channel
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<ConsensusEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Handle a message from a peer
    pub fn receive(&self, msg: PeerMessage) -> PbftResult<Outcome> {
        let kind = msg.kind();
        let result = self.state.lock().handle_peer_message(msg);
        self.finish(result, kind)
    }

    /// Accept a client transaction
    pub fn submit_transaction(&self, tx: Transaction) -> PbftResult<Outcome> {
        let result = self.state.lock().submit_transaction(tx);
        self.finish(result, "client transaction")
    }

    /// Propose if this replica leads and has pending work
    pub fn propose(&self) {
        let step = self.state.lock().propose();
        self.dispatch(step);
    }

    /// Advance to the next view
    pub fn rotate_leader(&self) {
        let step = self.state.lock().rotate_leader();
        self.dispatch(step);
    }

    /// Rotate the leader every `period` until `shutdown` flips to true
    pub fn spawn_rotation(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            info!("Leader rotation every {:?}", period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.rotate_leader(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Rotation timer for {} stopped", engine.id);
        })
    }

    /// Current status
    pub fn status(&self) -> ReplicaStatus {
        let state = self.state.lock();
        let tail = state.ledger().tail();
        ReplicaStatus {
            replica_id: state.id(),
            view: state.view(),
            leader: state.leader(),
            is_leader: state.is_leader(),
            ledger_length: state.ledger().len(),
            tail_index: tail.index,
            tail_hash: tail.hash.to_hex(),
            pending_transactions: state.pool().len(),
            replicas: state.replicas().len(),
            quorum_size: state.quorum_size(),
        }
    }

    /// Copy of the whole ledger
    pub fn ledger(&self) -> Vec<Block> {
        self.state.lock().ledger().blocks().to_vec()
    }

    pub fn ledger_len(&self) -> usize {
        self.state.lock().ledger().len()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.state.lock().ledger().get(index).cloned()
    }

    /// Index of the block holding a committed transaction
    pub fn find_transaction(&self, tx_id: &str) -> Option<u64> {
        self.state.lock().ledger().find_transaction(tx_id)
    }

    /// Pending transactions in arrival order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        let state = self.state.lock();
        state.pool().peek(state.pool().len())
    }

    /// Run a read-only closure against the state
    pub fn with_state<R>(&self, f: impl FnOnce(&ReplicaState) -> R) -> R {
        f(&self.state.lock())
    }

    fn finish(&self, result: PbftResult<Step>, what: &str) -> PbftResult<Outcome> {
        match result {
            Ok(step) => {
                let outcome = step.outcome;
                self.dispatch(step);
                Ok(outcome)
            }
            Err(e) => {
                warn!("{} dropped {}: {}", self.id, what, e);
                Err(e)
            }
        }
    }

    /// Publish events and fire one send task per outbound message. Called
    /// with the state lock released.
    fn dispatch(&self, step: Step) {
        for event in step.events {
            self.emit_event(event);
        }
        if step.outbound.is_empty() {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "No async runtime, dropping {} outbound message(s)",
                    step.outbound.len()
                );
                return;
            }
        };

        for Outbound { to, message } in step.outbound {
            let transport = Arc::clone(&self.transport);
            let from = self.id;
            handle.spawn(async move {
                let kind = message.kind();
                if let Err(e) = transport.send(to, message).await {
                    error!("{} failed to send {} message to {}: {}", from, kind, to, e);
                }
            });
        }
    }

    fn emit_event(&self, event: ConsensusEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Shared engine
pub type SharedEngine = Arc<PbftEngine>;

/// Create consensus event channel
pub fn create_consensus_channel(
    buffer: usize,
) -> (mpsc::Sender<ConsensusEvent>, mpsc::Receiver<ConsensusEvent>) {
    mpsc::channel(buffer.max(1))
}
