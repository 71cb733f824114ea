//! gpudra-api: REST API server for gpudra
//!
//! This crate exposes the allocation engine over HTTP:
//! - Claim parameter validation
//! - Node filtering, allocation and deallocation
//! - Node inventory publication and inspection
//! - System status

pub mod rest;

pub use rest::create_router;
