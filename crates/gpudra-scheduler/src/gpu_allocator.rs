//! GPU allocator for assigning node devices to claims

use gpudra_core::{AllocatableDevice, AllocatedDevices};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One claim of a batch, as the allocator sees it
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    /// Claim UID
    pub claim_uid: &'a str,
    /// Number of GPUs requested
    pub count: usize,
    /// Devices already committed to this claim on the node
    pub existing: Option<&'a AllocatedDevices>,
}

/// Greedy GPU allocator over one node's free pool.
///
/// Devices are handed out in ascending UUID order, so the same inventory and
/// holds always produce the same assignment.
#[derive(Debug, Clone)]
pub struct GpuAllocator {
    /// Number of GPUs in the inventory
    total: usize,
    /// UUIDs neither committed nor staged
    free: BTreeSet<String>,
}

impl GpuAllocator {
    /// Build the free pool: inventory GPUs minus `held` identities
    pub fn new<'a, I>(inventory: &[AllocatableDevice], held: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut free: BTreeSet<String> = inventory
            .iter()
            .map(|device| match device {
                AllocatableDevice::Gpu(gpu) => gpu.uuid.clone(),
            })
            .collect();
        let total = free.len();

        for id in held {
            free.remove(id);
        }

        Self { total, free }
    }

    /// Get the total number of GPUs
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// Get the number of unassigned GPUs
    pub fn available_count(&self) -> usize {
        self.free.len()
    }

    /// Take up to `count` GPUs from the free pool.
    ///
    /// Returns fewer than `count` UUIDs when the pool runs dry.
    pub fn allocate(&mut self, count: usize) -> Vec<String> {
        let take = count.min(self.free.len());
        (0..take).filter_map(|_| self.free.pop_first()).collect()
    }

    /// Assign devices to every claim of a batch, in batch order.
    ///
    /// A claim with an existing assignment keeps it unchanged. Other claims
    /// take what is left; a result shorter than the requested count means
    /// the node cannot satisfy that claim.
    pub fn allocate_batch(&mut self, requests: &[ClaimRequest<'_>]) -> HashMap<String, Vec<String>> {
        let mut allocated = HashMap::with_capacity(requests.len());

        for request in requests {
            let devices = match request.existing {
                Some(existing) => existing
                    .identities()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                None => self.allocate(request.count),
            };

            debug!(
                claim = request.claim_uid,
                requested = request.count,
                gpus = ?devices,
                "Assigned GPUs"
            );
            allocated.insert(request.claim_uid.to_string(), devices);
        }

        allocated
    }
}
