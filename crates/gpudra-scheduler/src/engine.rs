//! Allocation engine
//!
//! Implements the three operations the external scheduler drives:
//! - `evaluate_candidate_node` / `unsuitable_nodes`: filter nodes and stage a
//!   proposed assignment for every claim of the batch
//! - `commit` / `allocate`: persist the staged assignment on the selected node
//! - `release`: remove a committed assignment
//!
//! Every read-modify-write of a node's record happens under that node's lock.

use gpudra_core::{
    AllocatableDevice, AllocatedDevices, AllocationResult, ClaimAllocation, ClaimParameters,
    DeviceClassParameters, DraError, DraResult, NodeAllocationState, NodeAllocationStatus,
    ResourceClaim, ResourceClass, DRIVER_API_GROUP, GPU_CLAIM_PARAMETERS_KIND,
};
use gpudra_store::{NodeStateClient, ParameterSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gpu_allocator::{ClaimRequest, GpuAllocator};
use crate::node_lock::NodeLockRegistry;
use crate::staging::{StagingCache, VisitAction};

/// GPU claims can be consumed by several pods
const GPU_CLAIMS_SHAREABLE: bool = true;

/// Staging/commit allocation engine
pub struct AllocationEngine {
    /// Per-node locks guarding record read-modify-write cycles
    locks: NodeLockRegistry,
    /// Assignments proposed during filtering, not yet durable
    staging: StagingCache,
    /// Durable node allocation state
    nodes: NodeStateClient,
    /// Claim and class parameter objects
    parameters: Arc<dyn ParameterSource>,
}

impl AllocationEngine {
    /// Create a new allocation engine
    pub fn new(nodes: NodeStateClient, parameters: Arc<dyn ParameterSource>) -> Self {
        info!(
            namespace = %nodes.namespace(),
            backend = nodes.backend(),
            "Allocation engine initialized"
        );

        Self {
            locks: NodeLockRegistry::new(),
            staging: StagingCache::new(),
            nodes,
            parameters,
        }
    }

    pub fn staging(&self) -> &StagingCache {
        &self.staging
    }

    pub fn locks(&self) -> &NodeLockRegistry {
        &self.locks
    }

    pub fn nodes(&self) -> &NodeStateClient {
        &self.nodes
    }

    /// Reject malformed claim parameters
    pub fn validate_claim_parameters(&self, params: &ClaimParameters) -> DraResult<()> {
        params.validate()
    }

    /// Resolve the parameters of a resource class
    pub async fn get_class_parameters(
        &self,
        class: &ResourceClass,
    ) -> DraResult<DeviceClassParameters> {
        let Some(params_ref) = &class.parameters_ref else {
            return Ok(DeviceClassParameters::default());
        };
        if params_ref.api_group != DRIVER_API_GROUP {
            return Err(DraError::Parameters(format!(
                "incorrect API group: {}",
                params_ref.api_group
            )));
        }

        self.parameters
            .get_device_class_parameters(&params_ref.name)
            .await
            .map_err(|e| {
                e.context(format!(
                    "error getting DeviceClassParameters called '{}'",
                    params_ref.name
                ))
            })
    }

    /// Resolve and validate the parameters of a resource claim
    pub async fn get_claim_parameters(&self, claim: &ResourceClaim) -> DraResult<ClaimParameters> {
        let Some(params_ref) = &claim.parameters_ref else {
            return Ok(ClaimParameters::default());
        };
        if params_ref.api_group != DRIVER_API_GROUP {
            return Err(DraError::Parameters(format!(
                "incorrect API group: {}",
                params_ref.api_group
            )));
        }

        match params_ref.kind.as_str() {
            GPU_CLAIM_PARAMETERS_KIND => {
                let ctx = format!(
                    "GpuClaimParameters called '{}' in namespace '{}'",
                    params_ref.name, claim.namespace
                );
                let params = self
                    .parameters
                    .get_claim_parameters(&claim.namespace, &params_ref.name)
                    .await
                    .map_err(|e| e.context(format!("error getting {}", ctx)))?;
                self.validate_claim_parameters(&params)
                    .map_err(|e| e.context(format!("error validating {}", ctx)))?;
                Ok(params)
            }
            other => Err(DraError::Parameters(format!(
                "unknown ResourceClaim.ParametersRef.Kind: {}",
                other
            ))),
        }
    }

    /// Resolve the claim and class parameters of `claim` into a
    /// `ClaimAllocation` ready for evaluation. A claim without a class uses
    /// the default class parameters.
    pub async fn resolve_claim(
        &self,
        claim: ResourceClaim,
        class: Option<&ResourceClass>,
    ) -> DraResult<ClaimAllocation> {
        let claim_parameters = self
            .get_claim_parameters(&claim)
            .await
            .map_err(|e| e.context(format!("claim '{}'", claim.uid)))?;
        let class_parameters = match class {
            Some(class) => self
                .get_class_parameters(class)
                .await
                .map_err(|e| e.context(format!("claim '{}'", claim.uid)))?,
            None => DeviceClassParameters::default(),
        };

        let mut ca = ClaimAllocation::new(claim, claim_parameters);
        ca.class_parameters = class_parameters;
        Ok(ca)
    }

    /// Evaluate every potential node for a batch of claims.
    ///
    /// On return each claim's `unsuitable_nodes` lists, once, every node that
    /// cannot host the whole batch.
    pub async fn unsuitable_nodes(
        &self,
        cas: &mut [ClaimAllocation],
        potential_nodes: &[String],
    ) -> DraResult<()> {
        for node in potential_nodes {
            self.evaluate_candidate_node(cas, node)
                .await
                .map_err(|e| e.context(format!("error processing node '{}'", node)))?;
        }

        for ca in cas.iter_mut() {
            dedup_preserving_order(&mut ca.unsuitable_nodes);
        }

        Ok(())
    }

    /// Decide whether `node` can host every claim of the batch and stage the
    /// proposed devices if it can.
    ///
    /// A node that is missing, not ready or short on devices is appended to
    /// the `unsuitable_nodes` of every claim in the batch; that is not an
    /// error. Only invalid claim parameters fail the call.
    pub async fn evaluate_candidate_node(
        &self,
        cas: &mut [ClaimAllocation],
        node: &str,
    ) -> DraResult<()> {
        for ca in cas.iter() {
            self.validate_claim_parameters(&ca.claim_parameters)
                .map_err(|e| e.context(format!("claim '{}'", ca.claim.uid)))?;
        }

        let _guard = self.locks.lock(node).await;

        let nas = match self.nodes.get(node).await {
            Ok(nas) => nas,
            Err(e) => {
                debug!(node = node, error = %e, "Node allocation state unavailable");
                mark_unsuitable(cas, node);
                return Ok(());
            }
        };

        if !nas.is_ready() {
            debug!(node = node, status = %nas.status, "Node allocation state not ready");
            mark_unsuitable(cas, node);
            return Ok(());
        }

        // Committed claims plus claims staged on this node by earlier
        // evaluations. Staged entries that have since been committed are
        // dropped from the cache.
        let mut held: BTreeMap<String, AllocatedDevices> = nas.spec.allocated_claims.clone();
        self.staging
            .visit_node(node, |claim_uid, devices| {
                if nas.is_allocated(claim_uid) {
                    VisitAction::Remove
                } else {
                    held.insert(claim_uid.to_string(), devices.clone());
                    VisitAction::Keep
                }
            })
            .await;

        let requests: Vec<ClaimRequest<'_>> = cas
            .iter()
            .map(|ca| match &ca.claim_parameters {
                ClaimParameters::Gpu(params) => ClaimRequest {
                    claim_uid: ca.claim.uid.as_str(),
                    count: usize::try_from(params.count).unwrap_or(usize::MAX),
                    existing: held.get(&ca.claim.uid),
                },
            })
            .collect();

        let mut allocator = GpuAllocator::new(
            &nas.spec.allocatable_devices,
            held.values().flat_map(|devices| devices.identities()),
        );
        let allocated = allocator.allocate_batch(&requests);

        let shortfall = requests.iter().find_map(|request| {
            let assigned = allocated.get(request.claim_uid).map_or(0, Vec::len);
            (assigned != request.count).then(|| DraError::AllocationShortfall {
                node: node.to_string(),
                claim: request.claim_uid.to_string(),
                requested: request.count,
                assigned,
            })
        });
        drop(requests);

        if let Some(shortfall) = shortfall {
            debug!(error = %shortfall, "Node cannot satisfy claim batch");
            mark_unsuitable(cas, node);
            return Ok(());
        }

        for ca in cas.iter() {
            let uuids = allocated.get(&ca.claim.uid).cloned().unwrap_or_default();
            let devices = match &ca.claim_parameters {
                ClaimParameters::Gpu(_) => AllocatedDevices::gpus(uuids),
            };
            self.staging.set(&ca.claim.uid, node, devices).await;
        }

        debug!(
            node = node,
            claims = cas.len(),
            available = allocator.available_count(),
            "Staged claim batch"
        );

        Ok(())
    }

    /// Commit every claim of the batch on `selected_node`, one result per claim
    pub async fn allocate(
        &self,
        cas: &[ClaimAllocation],
        selected_node: Option<&str>,
    ) -> Vec<DraResult<AllocationResult>> {
        let mut results = Vec::with_capacity(cas.len());
        for ca in cas {
            results.push(
                self.commit(&ca.claim, &ca.claim_parameters, selected_node)
                    .await,
            );
        }
        results
    }

    /// Persist the devices staged for `claim` on `selected_node`.
    ///
    /// Committing a claim that is already recorded on the node performs no
    /// write. If the write fails the staged entry is kept so a retry can use
    /// it.
    pub async fn commit(
        &self,
        claim: &ResourceClaim,
        params: &ClaimParameters,
        selected_node: Option<&str>,
    ) -> DraResult<AllocationResult> {
        let node = selected_node.ok_or_else(|| {
            DraError::Unsupported(format!(
                "claim '{}': immediate allocation is not supported, a selected node is required",
                claim.uid
            ))
        })?;

        let _guard = self.locks.lock(node).await;

        let nas = self.nodes.get(node).await.map_err(|e| {
            e.context(format!(
                "error retrieving allocation state of node '{}'",
                node
            ))
        })?;

        if !nas.is_ready() {
            return Err(DraError::NotReady {
                node: node.to_string(),
                status: nas.status.to_string(),
            });
        }

        if nas.is_allocated(&claim.uid) {
            debug!(claim = %claim.uid, node = node, "Claim already committed");
            return Ok(AllocationResult::for_node(node, GPU_CLAIMS_SHAREABLE));
        }

        let devices = match params {
            ClaimParameters::Gpu(_) => self.staging.get(&claim.uid, node).await,
        }
        .ok_or_else(|| {
            DraError::Consistency(format!(
                "no allocations generated for claim '{}' on node '{}' yet",
                claim.uid, node
            ))
        })?;

        let mut updated = nas.clone();
        updated
            .spec
            .allocated_claims
            .insert(claim.uid.clone(), devices.clone());
        updated.check_consistency().map_err(|e| {
            e.context(format!(
                "unable to allocate devices on node '{}'",
                node
            ))
        })?;

        if let Err(e) = self.nodes.update(&nas, updated.spec).await {
            warn!(claim = %claim.uid, node = node, error = %e, "Failed to persist allocation");
            return Err(e.context("error updating node allocation state"));
        }

        self.staging.remove(&claim.uid).await;

        info!(
            claim = %claim.uid,
            node = node,
            devices = ?devices.identities(),
            "Committed claim allocation"
        );

        Ok(AllocationResult::for_node(node, GPU_CLAIMS_SHAREABLE))
    }

    /// Remove the committed devices of `claim` and forget any staged
    /// proposal for it.
    pub async fn release(&self, claim: &ResourceClaim) -> DraResult<()> {
        let Some(node) = claim.selected_node() else {
            self.staging.remove(&claim.uid).await;
            return Ok(());
        };

        let _guard = self.locks.lock(node).await;
        let result = self.release_on_node(claim, node).await;
        self.staging.remove(&claim.uid).await;
        result
    }

    async fn release_on_node(&self, claim: &ResourceClaim, node: &str) -> DraResult<()> {
        let nas = self.nodes.get(node).await.map_err(|e| {
            e.context(format!(
                "error retrieving allocation state of node '{}'",
                node
            ))
        })?;

        let Some(devices) = nas.spec.allocated_claims.get(&claim.uid) else {
            return Ok(());
        };
        let released = match devices {
            AllocatedDevices::Gpu(gpus) => gpus.devices.len(),
        };

        let mut spec = nas.spec.clone();
        spec.allocated_claims.remove(&claim.uid);
        self.nodes
            .update(&nas, spec)
            .await
            .map_err(|e| e.context("error updating node allocation state"))?;

        info!(
            claim = %claim.uid,
            node = node,
            released = released,
            "Released claim allocation"
        );

        Ok(())
    }

    /// Record the device inventory of `node` and mark it ready.
    ///
    /// Creates the record if it does not exist. Committed claims are kept;
    /// an inventory that no longer contains their devices is rejected.
    pub async fn publish_node_inventory(
        &self,
        node: &str,
        devices: Vec<AllocatableDevice>,
    ) -> DraResult<NodeAllocationState> {
        let _guard = self.locks.lock(node).await;

        let default = NodeAllocationState::new(node, self.nodes.namespace());
        let nas = self.nodes.get_or_create(&default).await?;

        let mut candidate = nas.clone();
        candidate.spec.allocatable_devices = devices;
        candidate.check_consistency()?;

        let nas = self.nodes.update(&nas, candidate.spec).await?;
        let nas = if nas.is_ready() {
            nas
        } else {
            self.nodes
                .update_status(&nas, NodeAllocationStatus::Ready)
                .await?
        };

        info!(
            node = node,
            devices = nas.spec.allocatable_devices.len(),
            claims = nas.spec.allocated_claims.len(),
            "Published node inventory"
        );

        Ok(nas)
    }
}

fn mark_unsuitable(cas: &mut [ClaimAllocation], node: &str) {
    for ca in cas.iter_mut() {
        ca.unsuitable_nodes.push(node.to_string());
    }
}

fn dedup_preserving_order(nodes: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    nodes.retain(|node| seen.insert(node.clone()));
}
