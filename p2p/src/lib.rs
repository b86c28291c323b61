//! PBFTCHAIN Replica Transport
//!
//! Point-to-point delivery between replicas over HTTP:
//! - Versioned bincode envelopes
//! - A peer table addressed by replica id
//! - An outbound `Transport` backed by `reqwest`
//! - The inbound `axum` route that feeds the consensus engine

pub mod network;
pub mod message;
pub mod peer;
pub mod inbound;

pub use network::*;
pub use message::*;
pub use peer::*;
pub use inbound::*;
