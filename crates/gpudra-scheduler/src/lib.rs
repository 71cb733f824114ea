//! gpudra-scheduler: GPU allocation engine for gpudra
//!
//! This crate decides which GPUs of a node are bound to a resource claim:
//! - Per-node locking of the durable allocation state
//! - Staging of proposed assignments between filtering and commit
//! - Greedy GPU assignment
//! - The allocation engine tying them together

pub mod engine;
pub mod gpu_allocator;
pub mod node_lock;
pub mod staging;

pub use engine::AllocationEngine;
pub use gpu_allocator::{ClaimRequest, GpuAllocator};
pub use node_lock::{NodeLockGuard, NodeLockRegistry};
pub use staging::{StagingCache, StagingEntry, VisitAction};
