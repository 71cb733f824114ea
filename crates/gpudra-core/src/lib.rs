//! gpudra-core: Core types for the gpudra GPU allocator
//!
//! This crate provides the fundamental types used throughout gpudra:
//! - Durable per-node allocation state
//! - Resource claims, claim/class parameters and allocation results
//! - Configuration types
//! - Error handling

pub mod claim;
pub mod config;
pub mod error;
pub mod node_state;

pub use claim::*;
pub use config::*;
pub use error::*;
pub use node_state::*;
