//! Container runtime interface.
//!
//! The runtime interface abstracts the imperative container operations the
//! node agent needs:
//! - Creating, starting, stopping and deleting a named container
//! - Executing a command inside a container
//! - Inspecting a container's existence, image and running status
//!
//! Every operation is keyed by the stable container name. "Not found" is
//! reported as `RuntimeError::NotFound` so callers can treat it as already
//! converged for stop/delete.

use std::net::IpAddr;

use async_trait::async_trait;
use nodeadm_id::{ContainerName, DockerImage, HostName};
use thiserror::Error;

use crate::node::ResourceLimits;

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No container with the given name exists.
    #[error("container not found: {0}")]
    NotFound(ContainerName),

    /// The request conflicts with the container's current state, e.g. it
    /// already exists or is still running.
    #[error("container {0} is in a conflicting state")]
    Conflict(ContainerName),

    /// The runtime could not be reached or the response could not be read.
    #[error("runtime transport error: {0}")]
    Transport(String),

    /// The runtime rejected the request.
    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    /// A command executed inside the container exited unsuccessfully.
    #[error("command {command:?} in {container} exited with {exit_code}: {output}")]
    CommandFailed {
        container: ContainerName,
        command: Vec<String>,
        exit_code: i64,
        output: String,
    },
}

impl RuntimeError {
    /// Returns true if the container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Observed status of a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Absent,
    Stopped,
    Running,
}

/// An existing container as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub name: ContainerName,
    pub hostname: Option<HostName>,
    pub image: DockerImage,
    pub running: bool,
    pub resources: ResourceLimits,
}

impl Container {
    pub fn status(&self) -> ContainerStatus {
        if self.running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateContainerRequest {
    pub hostname: HostName,
    pub container_name: ContainerName,
    pub image: DockerImage,
    pub resources: ResourceLimits,
    /// Address assigned on the container network; `None` uses the host network.
    pub ip_address: Option<IpAddr>,
}

/// Result of a command executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

impl ExecResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Container runtime interface.
///
/// Implementations must be safe for concurrent use by many node agents.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container.
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<(), RuntimeError>;

    /// Start a created or stopped container.
    async fn start_container(&self, name: &ContainerName) -> Result<(), RuntimeError>;

    /// Stop a running container.
    async fn stop_container(&self, name: &ContainerName) -> Result<(), RuntimeError>;

    /// Delete a stopped container.
    async fn delete_container(&self, name: &ContainerName) -> Result<(), RuntimeError>;

    /// Execute a command inside a running container and wait for it to exit.
    async fn execute_in_container(
        &self,
        name: &ContainerName,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError>;

    /// Inspect a container, returning `None` if it does not exist.
    async fn get_container(&self, name: &ContainerName) -> Result<Option<Container>, RuntimeError>;

    /// Status of a container.
    async fn get_container_status(&self, name: &ContainerName) -> Result<ContainerStatus, RuntimeError> {
        Ok(self
            .get_container(name)
            .await?
            .map_or(ContainerStatus::Absent, |c| c.status()))
    }
}
