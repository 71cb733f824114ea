//! Durable per-node allocation state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::{DraError, DraResult};

/// Device kinds a node can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Gpu,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// A GPU discovered on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatableGpu {
    /// Device UUID
    pub uuid: String,
    /// Marketing name reported by the driver
    #[serde(default)]
    pub product_name: String,
}

/// An inventory item on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatableDevice {
    Gpu(AllocatableGpu),
}

impl AllocatableDevice {
    /// Create a GPU inventory entry
    pub fn gpu(uuid: impl Into<String>, product_name: impl Into<String>) -> Self {
        AllocatableDevice::Gpu(AllocatableGpu {
            uuid: uuid.into(),
            product_name: product_name.into(),
        })
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            AllocatableDevice::Gpu(_) => DeviceKind::Gpu,
        }
    }

    /// Kind-specific identity
    pub fn identity(&self) -> &str {
        match self {
            AllocatableDevice::Gpu(gpu) => &gpu.uuid,
        }
    }
}

/// A GPU bound to a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedGpu {
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedGpus {
    pub devices: Vec<AllocatedGpu>,
}

/// Devices bound to one claim on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatedDevices {
    Gpu(AllocatedGpus),
}

impl AllocatedDevices {
    /// Build a GPU allocation from device UUIDs
    pub fn gpus<I, S>(uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllocatedDevices::Gpu(AllocatedGpus {
            devices: uuids
                .into_iter()
                .map(|uuid| AllocatedGpu { uuid: uuid.into() })
                .collect(),
        })
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            AllocatedDevices::Gpu(_) => DeviceKind::Gpu,
        }
    }

    /// Identities of every bound device
    pub fn identities(&self) -> Vec<&str> {
        match self {
            AllocatedDevices::Gpu(gpus) => gpus.devices.iter().map(|d| d.uuid.as_str()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AllocatedDevices::Gpu(gpus) => gpus.devices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle status of a node's allocation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAllocationStatus {
    #[default]
    NotReady,
    Ready,
}

impl std::fmt::Display for NodeAllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeAllocationStatus::NotReady => write!(f, "NotReady"),
            NodeAllocationStatus::Ready => write!(f, "Ready"),
        }
    }
}

/// Inventory and committed allocations of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAllocationStateSpec {
    /// Devices discovered on the node
    #[serde(default)]
    pub allocatable_devices: Vec<AllocatableDevice>,
    /// Claim UID to bound devices
    #[serde(default)]
    pub allocated_claims: BTreeMap<String, AllocatedDevices>,
}

/// The durable per-node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAllocationState {
    /// Node name
    pub name: String,
    /// Namespace the record lives in
    pub namespace: String,
    #[serde(default)]
    pub status: NodeAllocationStatus,
    #[serde(default)]
    pub spec: NodeAllocationStateSpec,
}

impl NodeAllocationState {
    /// Create an empty, not yet ready record
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            status: NodeAllocationStatus::NotReady,
            spec: NodeAllocationStateSpec::default(),
        }
    }

    /// `namespace/name`, used in logs and error messages
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeAllocationStatus::Ready
    }

    pub fn is_allocated(&self, claim_uid: &str) -> bool {
        self.spec.allocated_claims.contains_key(claim_uid)
    }

    /// Verify that inventory identities are unique, no device is
    /// double-booked and every bound device is part of the inventory.
    pub fn check_consistency(&self) -> DraResult<()> {
        let mut inventory: HashSet<&str> = HashSet::new();
        for device in &self.spec.allocatable_devices {
            if !inventory.insert(device.identity()) {
                return Err(DraError::Consistency(format!(
                    "device '{}' is listed twice in the inventory of node '{}'",
                    device.identity(),
                    self.name
                )));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (claim_uid, devices) in &self.spec.allocated_claims {
            for id in devices.identities() {
                if !inventory.contains(id) {
                    return Err(DraError::Consistency(format!(
                        "claim '{}' on node '{}' holds unknown device '{}'",
                        claim_uid, self.name, id
                    )));
                }
                if !seen.insert(id) {
                    return Err(DraError::Consistency(format!(
                        "device '{}' on node '{}' is allocated more than once",
                        id, self.name
                    )));
                }
            }
        }
        Ok(())
    }
}
