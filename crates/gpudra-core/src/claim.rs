//! Resource claims, their parameters and allocation results

use serde::{Deserialize, Serialize};

use crate::node_state::DeviceKind;
use crate::{DraError, DraResult};

/// API group owning the parameter objects this driver understands
pub const DRIVER_API_GROUP: &str = "gpu.resource.example.com";

/// Kind of the GPU claim parameters object
pub const GPU_CLAIM_PARAMETERS_KIND: &str = "GpuClaimParameters";

/// Field key used in the node selector of an allocation result
pub const NODE_NAME_FIELD: &str = "metadata.name";

/// Reference to a parameters object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

/// Parameters of a GPU claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuClaimParameters {
    /// Number of GPUs requested
    pub count: i64,
}

impl Default for GpuClaimParameters {
    fn default() -> Self {
        Self { count: 1 }
    }
}

/// Resolved parameters of a claim, one variant per parameters kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimParameters {
    Gpu(GpuClaimParameters),
}

impl Default for ClaimParameters {
    fn default() -> Self {
        ClaimParameters::Gpu(GpuClaimParameters::default())
    }
}

impl ClaimParameters {
    /// Kind name as used in a `ParametersRef`
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClaimParameters::Gpu(_) => GPU_CLAIM_PARAMETERS_KIND,
        }
    }

    pub fn validate(&self) -> DraResult<()> {
        match self {
            ClaimParameters::Gpu(params) => {
                if params.count < 1 {
                    return Err(DraError::Validation(format!(
                        "invalid number of GPUs requested: {}",
                        params.count
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Selects devices of a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelector {
    #[serde(rename = "type")]
    pub device_type: DeviceKind,
    pub name: String,
}

/// Parameters attached to a resource class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClassParameters {
    pub device_selector: Vec<DeviceSelector>,
}

impl Default for DeviceClassParameters {
    fn default() -> Self {
        Self {
            device_selector: vec![DeviceSelector {
                device_type: DeviceKind::Gpu,
                name: "*".to_string(),
            }],
        }
    }
}

/// A single node selector requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_fields: Vec<NodeSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelector {
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

/// Outcome of a committed allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Nodes the allocated devices are reachable from
    pub available_on_nodes: Option<NodeSelector>,
    /// Whether several consumers may share the claim
    pub shareable: bool,
}

impl AllocationResult {
    /// Result pinning a claim to exactly one node
    pub fn for_node(node: &str, shareable: bool) -> Self {
        Self {
            available_on_nodes: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: vec![NodeSelectorRequirement {
                        key: NODE_NAME_FIELD.to_string(),
                        operator: "In".to_string(),
                        values: vec![node.to_string()],
                    }],
                }],
            }),
            shareable,
        }
    }

    /// Node the claim was committed on, if the selector names one
    pub fn selected_node(&self) -> Option<&str> {
        self.available_on_nodes
            .as_ref()?
            .node_selector_terms
            .first()?
            .match_fields
            .first()?
            .values
            .first()
            .map(String::as_str)
    }
}

/// A resource claim as seen by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaim {
    /// Unique claim identifier
    pub uid: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub parameters_ref: Option<ParametersRef>,
    /// Set once the claim has been allocated
    #[serde(default)]
    pub allocation: Option<AllocationResult>,
}

impl ResourceClaim {
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            namespace: namespace.into(),
            parameters_ref: None,
            allocation: None,
        }
    }

    /// Node the claim is currently allocated on
    pub fn selected_node(&self) -> Option<&str> {
        self.allocation.as_ref()?.selected_node()
    }
}

/// A resource class as seen by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClass {
    pub name: String,
    #[serde(default)]
    pub parameters_ref: Option<ParametersRef>,
}

/// One claim of a scheduling batch, with its resolved parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAllocation {
    pub claim: ResourceClaim,
    pub claim_parameters: ClaimParameters,
    #[serde(default)]
    pub class_parameters: DeviceClassParameters,
    /// Nodes found unable to satisfy this claim
    #[serde(default)]
    pub unsuitable_nodes: Vec<String>,
}

impl ClaimAllocation {
    pub fn new(claim: ResourceClaim, claim_parameters: ClaimParameters) -> Self {
        Self {
            claim,
            claim_parameters,
            class_parameters: DeviceClassParameters::default(),
            unsuitable_nodes: Vec::new(),
        }
    }
}
