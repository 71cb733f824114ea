//! Storage trait definitions

use async_trait::async_trait;
use gpudra_core::{ClaimParameters, DeviceClassParameters, DraResult, NodeAllocationState};

/// Backend holding the durable node allocation state records
#[async_trait]
pub trait NodeStateStore: Send + Sync {
    /// Fetch a record, `NotFound` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> DraResult<NodeAllocationState>;

    /// Store a new record, `AlreadyExists` if one is present
    async fn create(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState>;

    /// Replace an existing record, `NotFound` if it does not exist
    async fn update(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState>;

    /// Remove a record, `NotFound` if it does not exist
    async fn delete(&self, namespace: &str, name: &str) -> DraResult<()>;

    /// All records in a namespace
    async fn list(&self, namespace: &str) -> DraResult<Vec<NodeAllocationState>>;

    /// Get the backend name
    fn name(&self) -> &'static str;
}

/// Lookup of claim and class parameter objects
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Fetch the GPU claim parameters object `name` in `namespace`
    async fn get_claim_parameters(&self, namespace: &str, name: &str)
        -> DraResult<ClaimParameters>;

    /// Fetch the cluster-scoped device class parameters object `name`
    async fn get_device_class_parameters(&self, name: &str) -> DraResult<DeviceClassParameters>;
}
