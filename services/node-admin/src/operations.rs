//! Container operations used by the node agent.
//!
//! Wraps a `ContainerRuntime` with the node-level vocabulary the agent
//! speaks: provision a container for a spec, probe it, resume it, restart
//! its services, and remove it. Stop and delete treat "not found" as done.

use std::sync::Arc;

use nodeadm_id::{ContainerName, DockerImage};
use tracing::{debug, info};

use crate::environment::Environment;
use crate::error::AgentError;
use crate::node::NodeSpec;
use crate::runtime::{Container, ContainerRuntime, CreateContainerRequest, RuntimeError};

/// Default path of the in-container node control program.
pub const DEFAULT_NODE_CTL: &str = "/opt/vespa/bin/vespa-nodectl";

/// Node-level container operations.
#[derive(Clone)]
pub struct ContainerOperations {
    runtime: Arc<dyn ContainerRuntime>,
    environment: Environment,
    node_ctl: String,
}

impl ContainerOperations {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, environment: Environment) -> Self {
        Self {
            runtime,
            environment,
            node_ctl: DEFAULT_NODE_CTL.to_string(),
        }
    }

    /// Use a different node control program inside containers.
    pub fn with_node_ctl(mut self, node_ctl: impl Into<String>) -> Self {
        self.node_ctl = node_ctl.into();
        self
    }

    /// Command that succeeds once the node control program is installed and executable.
    pub fn probe_command(&self) -> Vec<String> {
        vec![
            "/usr/bin/env".to_string(),
            "test".to_string(),
            "-x".to_string(),
            self.node_ctl.clone(),
        ]
    }

    /// Command that tells the in-container services to start taking traffic.
    pub fn resume_command(&self) -> Vec<String> {
        vec![self.node_ctl.clone(), "resume".to_string()]
    }

    /// Command that restarts the in-container services.
    pub fn restart_command(&self) -> Vec<String> {
        vec![self.node_ctl.clone(), "restart".to_string()]
    }

    pub async fn get_container(&self, name: &ContainerName) -> Result<Option<Container>, AgentError> {
        Ok(self.runtime.get_container(name).await?)
    }

    /// Create and start a container for `spec` running `image`.
    pub async fn create_and_start(
        &self,
        spec: &NodeSpec,
        image: &DockerImage,
    ) -> Result<(), AgentError> {
        let ip_address = self
            .environment
            .container_address(&spec.hostname)
            .await
            .map_err(|source| AgentError::AddressResolution {
                hostname: spec.hostname.clone(),
                source,
            })?;

        let request = CreateContainerRequest {
            hostname: spec.hostname.clone(),
            container_name: spec.container_name.clone(),
            image: image.clone(),
            resources: spec.resource_limits(),
            ip_address,
        };

        info!(
            hostname = %spec.hostname,
            container = %spec.container_name,
            image = %image,
            ip_address = ?ip_address,
            "Creating container"
        );
        self.runtime.create_container(&request).await?;
        self.start(&spec.container_name).await
    }

    pub async fn start(&self, name: &ContainerName) -> Result<(), AgentError> {
        info!(container = %name, "Starting container");
        self.runtime.start_container(name).await?;
        Ok(())
    }

    /// Stop a container. A missing container counts as stopped.
    pub async fn stop(&self, name: &ContainerName) -> Result<(), AgentError> {
        info!(container = %name, "Stopping container");
        match self.runtime.stop_container(name).await {
            Err(e) if e.is_not_found() => {
                debug!(container = %name, "Container already gone");
                Ok(())
            }
            result => Ok(result?),
        }
    }

    /// Delete a container. A missing container counts as deleted.
    pub async fn delete(&self, name: &ContainerName) -> Result<(), AgentError> {
        info!(container = %name, "Deleting container");
        match self.runtime.delete_container(name).await {
            Err(e) if e.is_not_found() => {
                debug!(container = %name, "Container already gone");
                Ok(())
            }
            result => Ok(result?),
        }
    }

    /// Whether the node inside the container is ready to be resumed.
    pub async fn probe(&self, name: &ContainerName) -> Result<bool, AgentError> {
        let result = self
            .runtime
            .execute_in_container(name, &self.probe_command())
            .await?;
        debug!(container = %name, exit_code = result.exit_code, "Readiness probe");
        Ok(result.is_success())
    }

    pub async fn resume_node(&self, name: &ContainerName) -> Result<(), AgentError> {
        info!(container = %name, "Resuming node");
        self.run_checked(name, self.resume_command()).await
    }

    pub async fn restart_services(&self, name: &ContainerName) -> Result<(), AgentError> {
        info!(container = %name, "Restarting services");
        self.run_checked(name, self.restart_command()).await
    }

    async fn run_checked(&self, name: &ContainerName, command: Vec<String>) -> Result<(), AgentError> {
        let result = self.runtime.execute_in_container(name, &command).await?;
        if result.is_success() {
            return Ok(());
        }
        Err(RuntimeError::CommandFailed {
            container: name.clone(),
            command,
            exit_code: result.exit_code,
            output: result.output,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NetworkType;
    use crate::mock::{CallLog, MockRuntime, StaticResolver};
    use crate::node::NodeState;
    use nodeadm_id::HostName;

    fn operations(runtime: Arc<MockRuntime>) -> ContainerOperations {
        let resolver = Arc::new(StaticResolver::new("1.1.1.1".parse().unwrap()));
        let environment = Environment::new(NetworkType::Normal, "dev", "us-east-1", resolver);
        ContainerOperations::new(runtime, environment)
    }

    fn spec() -> NodeSpec {
        NodeSpec::new(
            HostName::parse("host1").unwrap(),
            ContainerName::parse("container").unwrap(),
            NodeState::Active,
        )
    }

    #[tokio::test]
    async fn test_stop_and_delete_missing_container_is_ok() {
        let log = CallLog::new();
        let runtime = Arc::new(MockRuntime::new(log.clone()));
        let ops = operations(runtime);
        let name = ContainerName::parse("container").unwrap();

        ops.stop(&name).await.unwrap();
        ops.delete(&name).await.unwrap();
        assert_eq!(
            log.entries(),
            vec![
                "stopContainer with ContainerName: container".to_string(),
                "deleteContainer with ContainerName: container".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_and_start_uses_resolved_address() {
        let log = CallLog::new();
        let runtime = Arc::new(MockRuntime::new(log.clone()));
        let ops = operations(Arc::clone(&runtime));
        let image = DockerImage::parse("dockerImage").unwrap();

        ops.create_and_start(&spec(), &image).await.unwrap();

        let container = runtime.container("container").unwrap();
        assert!(container.running);
        assert_eq!(container.image, image);
        assert_eq!(
            runtime.last_create_request().unwrap().ip_address,
            Some("1.1.1.1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_resume_failure_is_command_error() {
        let log = CallLog::new();
        let runtime = Arc::new(MockRuntime::new(log));
        let ops = operations(Arc::clone(&runtime));
        let image = DockerImage::parse("dockerImage").unwrap();
        ops.create_and_start(&spec(), &image).await.unwrap();

        runtime.set_exec_exit_code(ops.resume_command(), 1);
        let err = ops
            .resume_node(&ContainerName::parse("container").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Runtime(RuntimeError::CommandFailed { exit_code: 1, .. })
        ));
    }

    #[test]
    fn test_commands_use_node_ctl() {
        let runtime = Arc::new(MockRuntime::new(CallLog::new()));
        let ops = operations(runtime).with_node_ctl("/bin/nodectl");
        assert_eq!(ops.probe_command(), vec!["/usr/bin/env", "test", "-x", "/bin/nodectl"]);
        assert_eq!(ops.resume_command(), vec!["/bin/nodectl", "resume"]);
        assert_eq!(ops.restart_command(), vec!["/bin/nodectl", "restart"]);
    }
}
