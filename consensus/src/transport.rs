//! Outbound transport seam
//!
//! Delivery contract: at-most-once and unordered. Implementations must not
//! retry; the engine logs and drops failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use pbftchain_core::{PbftResult, ReplicaId};

use crate::message::PeerMessage;
use crate::state::Outbound;

/// Sends messages to peers addressed by replica id
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: ReplicaId, msg: PeerMessage) -> PbftResult<()>;
}

/// In-memory transport that records every send
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Outbound>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything sent so far
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, peer: ReplicaId, msg: PeerMessage) -> PbftResult<()> {
        self.sent.lock().push(Outbound {
            to: peer,
            message: msg,
        });
        Ok(())
    }
}
