//! PBFTCHAIN Core Library
//! 
//! Core types, traits, and abstractions shared by every PBFTCHAIN crate.
//! This crate has no knowledge of consensus; it only fixes the vocabulary.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
