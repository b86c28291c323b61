//! PBFTCHAIN Node
//!
//! Wires one replica together:
//! - Replica set and key loading from configuration
//! - Consensus engine over the HTTP transport
//! - Client HTTP API and the peer route on one listener

mod api;
mod node;
mod runtime;

pub use api::*;
pub use node::*;
pub use runtime::*;
