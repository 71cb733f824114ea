//! In-memory stores

use async_trait::async_trait;
use gpudra_core::{ClaimParameters, DeviceClassParameters, DraError, DraResult, NodeAllocationState};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::{NodeStateStore, ParameterSource};

type RecordKey = (String, String);

/// Node allocation state kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    /// Records indexed by (namespace, name)
    records: RwLock<HashMap<RecordKey, NodeAllocationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, name: &str) -> RecordKey {
        (namespace.to_string(), name.to_string())
    }
}

#[async_trait]
impl NodeStateStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> DraResult<NodeAllocationState> {
        let records = self.records.read().await;
        records
            .get(&Self::key(namespace, name))
            .cloned()
            .ok_or_else(|| DraError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn create(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState> {
        let mut records = self.records.write().await;
        let key = Self::key(&state.namespace, &state.name);
        if records.contains_key(&key) {
            return Err(DraError::AlreadyExists(state.key()));
        }
        records.insert(key, state.clone());
        debug!(record = %state.key(), "Created node allocation state");
        Ok(state.clone())
    }

    async fn update(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState> {
        let mut records = self.records.write().await;
        match records.get_mut(&Self::key(&state.namespace, &state.name)) {
            Some(existing) => {
                *existing = state.clone();
                Ok(state.clone())
            }
            None => Err(DraError::NotFound(state.key())),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> DraResult<()> {
        let mut records = self.records.write().await;
        records
            .remove(&Self::key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| DraError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn list(&self, namespace: &str) -> DraResult<Vec<NodeAllocationState>> {
        let records = self.records.read().await;
        let mut states: Vec<NodeAllocationState> = records
            .values()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Parameter objects kept in process memory
#[derive(Default)]
pub struct MemoryParameterSource {
    claim_parameters: RwLock<HashMap<RecordKey, ClaimParameters>>,
    class_parameters: RwLock<HashMap<String, DeviceClassParameters>>,
}

impl MemoryParameterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a claim parameters object
    pub async fn insert_claim_parameters(
        &self,
        namespace: &str,
        name: &str,
        params: ClaimParameters,
    ) {
        self.claim_parameters
            .write()
            .await
            .insert((namespace.to_string(), name.to_string()), params);
    }

    /// Register a device class parameters object
    pub async fn insert_device_class_parameters(&self, name: &str, params: DeviceClassParameters) {
        self.class_parameters
            .write()
            .await
            .insert(name.to_string(), params);
    }
}

#[async_trait]
impl ParameterSource for MemoryParameterSource {
    async fn get_claim_parameters(
        &self,
        namespace: &str,
        name: &str,
    ) -> DraResult<ClaimParameters> {
        self.claim_parameters
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| DraError::NotFound(format!("GpuClaimParameters {}/{}", namespace, name)))
    }

    async fn get_device_class_parameters(&self, name: &str) -> DraResult<DeviceClassParameters> {
        self.class_parameters
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DraError::NotFound(format!("DeviceClassParameters {}", name)))
    }
}
