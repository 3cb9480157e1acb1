//! Desired-state descriptors received from the node repository.

use nodeadm_id::{ContainerName, DockerImage, HostName};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a node as declared by the node repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Parked,
}

impl NodeState {
    /// Lowercase wire name, as used in repository URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Dirty => "dirty",
            Self::Failed => "failed",
            Self::Parked => "parked",
        }
    }

    /// States in which the agent must make sure no container exists.
    pub fn wants_container_removed(&self) -> bool {
        matches!(self, Self::Inactive | Self::Dirty)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioned" => Ok(Self::Provisioned),
            "ready" => Ok(Self::Ready),
            "reserved" => Ok(Self::Reserved),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "dirty" => Ok(Self::Dirty),
            "failed" => Ok(Self::Failed),
            "parked" => Ok(Self::Parked),
            other => Err(format!("unknown node state: {other}")),
        }
    }
}

/// Tenant ownership of an allocated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub tenant: String,
    pub application: String,
    pub instance: String,
}

/// Resource limits applied to a container at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: Option<f64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
}

impl ResourceLimits {
    /// Memory limit in bytes, if set.
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory_gb.map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as i64)
    }

    /// CPU limit in units of 10^-9 CPUs, if set.
    pub fn nano_cpus(&self) -> Option<i64> {
        self.cpu_cores.map(|cores| (cores * 1e9) as i64)
    }
}

/// Desired state of one node, immutable per repository fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: HostName,
    pub wanted_docker_image: Option<DockerImage>,
    pub container_name: ContainerName,
    pub node_state: NodeState,
    pub node_type: String,
    pub node_flavor: Option<String>,
    pub owner: Option<Owner>,
    pub wanted_restart_generation: Option<i64>,
    pub current_restart_generation: Option<i64>,
    pub min_cpu_cores: Option<f64>,
    pub min_main_memory_available_gb: Option<f64>,
    pub min_disk_available_gb: Option<f64>,
}

impl NodeSpec {
    /// A spec with only the identifying fields set.
    pub fn new(hostname: HostName, container_name: ContainerName, node_state: NodeState) -> Self {
        Self {
            hostname,
            wanted_docker_image: None,
            container_name,
            node_state,
            node_type: "tenant".to_string(),
            node_flavor: None,
            owner: None,
            wanted_restart_generation: None,
            current_restart_generation: None,
            min_cpu_cores: None,
            min_main_memory_available_gb: None,
            min_disk_available_gb: None,
        }
    }

    pub fn with_image(mut self, image: DockerImage) -> Self {
        self.wanted_docker_image = Some(image);
        self
    }

    pub fn with_state(mut self, node_state: NodeState) -> Self {
        self.node_state = node_state;
        self
    }

    pub fn with_resources(mut self, limits: ResourceLimits) -> Self {
        self.min_cpu_cores = limits.cpu_cores;
        self.min_main_memory_available_gb = limits.memory_gb;
        self.min_disk_available_gb = limits.disk_gb;
        self
    }

    pub fn with_restart_generation(mut self, wanted: i64, current: i64) -> Self {
        self.wanted_restart_generation = Some(wanted);
        self.current_restart_generation = Some(current);
        self
    }

    /// Resource limits derived from the spec's minimums.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_cores: self.min_cpu_cores,
            memory_gb: self.min_main_memory_available_gb,
            disk_gb: self.min_disk_available_gb,
        }
    }

    /// Restart generation the node should be brought to, if a restart is pending.
    ///
    /// A wanted generation without a known current one counts as pending.
    pub fn pending_restart_generation(&self) -> Option<i64> {
        match (self.wanted_restart_generation, self.current_restart_generation) {
            (Some(wanted), Some(current)) if wanted > current => Some(wanted),
            (Some(wanted), None) => Some(wanted),
            _ => None,
        }
    }
}

/// Attributes the agent publishes back to the node repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_restart_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_docker_image: Option<DockerImage>,
}
