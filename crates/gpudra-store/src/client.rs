//! Client for the durable per-node allocation state

use gpudra_core::{
    DraError, DraResult, NodeAllocationState, NodeAllocationStateSpec, NodeAllocationStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::NodeStateStore;

/// Reads and writes node allocation state records in one namespace.
///
/// Every call is bounded by the configured timeout. Writes replace either the
/// whole spec or the whole status of a record; no version token is checked.
#[derive(Clone)]
pub struct NodeStateClient {
    store: Arc<dyn NodeStateStore>,
    namespace: String,
    timeout: Duration,
}

impl NodeStateClient {
    pub fn new(store: Arc<dyn NodeStateStore>, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            timeout,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the backend name
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    async fn bounded<T, F>(&self, op: &str, node: &str, fut: F) -> DraResult<T>
    where
        F: Future<Output = DraResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op = op, node = node, timeout = ?self.timeout, "Node state call timed out");
                Err(DraError::Store(format!(
                    "{} of {}/{} timed out after {:?}",
                    op, self.namespace, node, self.timeout
                )))
            }
        }
    }

    /// Fetch the record of `node`
    pub async fn get(&self, node: &str) -> DraResult<NodeAllocationState> {
        self.bounded("get", node, self.store.get(&self.namespace, node))
            .await
    }

    /// Fetch the record of `default.name`, creating it from `default` if it
    /// does not exist yet
    pub async fn get_or_create(
        &self,
        default: &NodeAllocationState,
    ) -> DraResult<NodeAllocationState> {
        match self.get(&default.name).await {
            Ok(state) => Ok(state),
            Err(e) if e.is_not_found() => {
                debug!(node = %default.name, "Node allocation state missing, creating it");
                self.create(default).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create a record, failing if it already exists
    pub async fn create(&self, state: &NodeAllocationState) -> DraResult<NodeAllocationState> {
        let mut state = state.clone();
        state.namespace = self.namespace.clone();
        self.bounded("create", &state.name, self.store.create(&state))
            .await
    }

    /// Replace the spec of `state` and return the stored record
    pub async fn update(
        &self,
        state: &NodeAllocationState,
        spec: NodeAllocationStateSpec,
    ) -> DraResult<NodeAllocationState> {
        let mut updated = state.clone();
        updated.spec = spec;
        self.bounded("update", &updated.name, self.store.update(&updated))
            .await
    }

    /// Replace the status of `state` and return the stored record
    pub async fn update_status(
        &self,
        state: &NodeAllocationState,
        status: NodeAllocationStatus,
    ) -> DraResult<NodeAllocationState> {
        let mut updated = state.clone();
        updated.status = status;
        self.bounded("update_status", &updated.name, self.store.update(&updated))
            .await
    }

    /// Remove the record of `node`; a missing record is not an error
    pub async fn delete(&self, node: &str) -> DraResult<()> {
        match self
            .bounded("delete", node, self.store.delete(&self.namespace, node))
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// All records in the namespace
    pub async fn list(&self) -> DraResult<Vec<NodeAllocationState>> {
        self.bounded("list", "*", self.store.list(&self.namespace))
            .await
    }
}
