//! Per-node async locks
//!
//! Every read-modify-write cycle against a node's allocation state runs under
//! that node's lock. Locks for different nodes are independent.
//!
//! The registry stores weak references only. When the last guard or waiter
//! for a node goes away the entry is removed, so the map is bounded by the
//! number of nodes with work in flight rather than by every node ever seen.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Weak<Mutex<()>>>;

/// Holds a node lock; releases it and prunes the registry entry on drop.
pub struct NodeLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    node: String,
    locks: Arc<LockMap>,
}

impl NodeLockGuard {
    /// Node this guard serializes
    pub fn node(&self) -> &str {
        &self.node
    }
}

impl Drop for NodeLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // The shard lock held by remove_if keeps get_or_create from upgrading
        // the weak reference while the count is checked.
        let lock = &self.lock;
        self.locks.remove_if(&self.node, |_, weak| {
            Arc::strong_count(lock) == 1 && Weak::ptr_eq(weak, &Arc::downgrade(lock))
        });
    }
}

/// Hands out one mutex per node.
#[derive(Default)]
pub struct NodeLockRegistry {
    locks: Arc<LockMap>,
}

impl NodeLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock of `node`, waiting for the current holder if any.
    ///
    /// Callers for the same node are serialized, callers for different nodes
    /// proceed in parallel.
    pub async fn lock(&self, node: &str) -> NodeLockGuard {
        let lock = self.get_or_create(node);
        let guard = Arc::clone(&lock).lock_owned().await;

        NodeLockGuard {
            guard: Some(guard),
            lock,
            node: node.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn get_or_create(&self, node: &str) -> Arc<Mutex<()>> {
        loop {
            match self.locks.entry(node.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    if let Some(strong) = occupied.get().upgrade() {
                        return strong;
                    }
                    // Last user was cancelled before it could prune
                    occupied.remove();
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let strong = Arc::new(Mutex::new(()));
                    vacant.insert(Arc::downgrade(&strong));
                    return strong;
                }
            }
        }
    }

    /// Number of nodes with a held or awaited lock
    pub fn len(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
