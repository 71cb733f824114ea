//! gpudra-store: Durable node allocation state
//!
//! This crate provides storage for the per-node allocation records:
//! - The `NodeStateStore` backend trait with in-memory and file backends
//! - `NodeStateClient`, the timeout-bounded record client used by the engine
//! - The `ParameterSource` trait for claim and class parameter objects

pub mod client;
pub mod file;
pub mod memory;
pub mod traits;

pub use client::NodeStateClient;
pub use file::FileStore;
pub use memory::{MemoryParameterSource, MemoryStore};
pub use traits::{NodeStateStore, ParameterSource};
