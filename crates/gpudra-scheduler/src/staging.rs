//! Pending allocations computed during node filtering
//!
//! An entry records the devices proposed for a claim on the node it was last
//! evaluated against. There is at most one entry per claim: staging a claim
//! on another node replaces the previous proposal.

use gpudra_core::AllocatedDevices;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Devices proposed for a claim on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub node: String,
    pub devices: AllocatedDevices,
}

/// What `visit_node` does with an entry after the visitor has seen it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Keep,
    Remove,
}

/// In-memory table of staged allocations keyed by claim UID
#[derive(Default)]
pub struct StagingCache {
    entries: Mutex<HashMap<String, StagingEntry>>,
}

impl StagingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `claim_uid` is staged on `node`
    pub async fn exists(&self, claim_uid: &str, node: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(claim_uid)
            .is_some_and(|entry| entry.node == node)
    }

    /// Devices staged for `claim_uid` on `node`
    pub async fn get(&self, claim_uid: &str, node: &str) -> Option<AllocatedDevices> {
        let entries = self.entries.lock().await;
        entries
            .get(claim_uid)
            .filter(|entry| entry.node == node)
            .map(|entry| entry.devices.clone())
    }

    /// Stage `devices` for `claim_uid` on `node`, replacing any prior entry
    pub async fn set(&self, claim_uid: &str, node: &str, devices: AllocatedDevices) {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(
            claim_uid.to_string(),
            StagingEntry {
                node: node.to_string(),
                devices,
            },
        );
        if let Some(previous) = previous.filter(|p| p.node != node) {
            debug!(
                claim = claim_uid,
                from = %previous.node,
                to = node,
                "Staged claim moved to another node"
            );
        }
    }

    /// Drop the entry of `claim_uid`, whatever node it is staged on
    pub async fn remove(&self, claim_uid: &str) -> Option<StagingEntry> {
        self.entries.lock().await.remove(claim_uid)
    }

    /// Call `visitor` for every claim staged on `node` while holding the
    /// cache lock. Entries the visitor answers `Remove` for are dropped in
    /// the same critical section.
    pub async fn visit_node<F>(&self, node: &str, mut visitor: F)
    where
        F: FnMut(&str, &AllocatedDevices) -> VisitAction,
    {
        let mut entries = self.entries.lock().await;
        entries.retain(|claim_uid, entry| {
            entry.node != node || visitor(claim_uid, &entry.devices) == VisitAction::Keep
        });
    }

    /// Number of staged claims
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
