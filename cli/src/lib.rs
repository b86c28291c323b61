//! PBFTCHAIN CLI library: wallets and the replica API client

pub mod commands;
pub mod wallet;

pub use commands::*;
pub use wallet::*;
