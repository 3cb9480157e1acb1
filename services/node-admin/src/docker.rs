//! Docker Engine API runtime.
//!
//! This module provides a `ContainerRuntime` backed by the Docker Engine API
//! on its Unix socket. Resource limits are applied through `HostConfig` and
//! also recorded as labels, so an inspected container reports exactly the
//! limits it was created with.
//!
//! Reference: https://docs.docker.com/engine/api/v1.41/

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use hyper::{body::Bytes, Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use nodeadm_id::{ContainerName, DockerImage, HostName};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::node::ResourceLimits;
use crate::runtime::{
    Container, ContainerRuntime, CreateContainerRequest, ExecResult, RuntimeError,
};

/// Default Docker socket path.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default user-defined network containers are attached to.
pub const DEFAULT_DOCKER_NETWORK: &str = "nodeadm";

const LABEL_MANAGED: &str = "nodeadm.managed";
const LABEL_CPU: &str = "nodeadm.min-cpu-cores";
const LABEL_MEMORY: &str = "nodeadm.min-memory-gb";
const LABEL_DISK: &str = "nodeadm.min-disk-gb";

/// Seconds Docker waits for a graceful stop before killing the container.
const STOP_TIMEOUT_SECS: u32 = 10;

/// Docker Engine API client for Unix socket communication.
pub struct DockerRuntime {
    socket_path: String,
    network: String,
    client: Client<UnixConnector>,
}

impl DockerRuntime {
    /// Create a new Docker client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_string_lossy().to_string(),
            network: DEFAULT_DOCKER_NETWORK.to_string(),
            client: Client::unix(),
        }
    }

    /// Attach created containers to `network` instead of the default.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Bytes), RuntimeError> {
        let uri = Uri::new(&self.socket_path, path);
        debug!(method = %method, path = path, "Docker API request");

        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        let request = match body {
            Some(body) => {
                let bytes = serde_json::to_vec(&body)
                    .map_err(|e| RuntimeError::Transport(e.to_string()))?;
                builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(bytes))
            }
            None => builder.body(Body::empty()),
        }
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        Ok((status, bytes))
    }

    /// Map a response for an operation on an existing container.
    fn expect_success(
        name: &ContainerName,
        status: StatusCode,
        body: &Bytes,
    ) -> Result<(), RuntimeError> {
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        Err(api_error(name, status, body))
    }
}

fn api_error(name: &ContainerName, status: StatusCode, body: &Bytes) -> RuntimeError {
    match status {
        StatusCode::NOT_FOUND => RuntimeError::NotFound(name.clone()),
        StatusCode::CONFLICT => RuntimeError::Conflict(name.clone()),
        _ => {
            let message = docker_message(body);
            error!(container = %name, status = %status, message = %message, "Docker API error");
            RuntimeError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// Docker wraps errors as `{"message": "..."}`.
fn docker_message(body: &Bytes) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string())
}

fn resource_labels(resources: &ResourceLimits) -> HashMap<String, String> {
    let mut labels = HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())]);
    let entries = [
        (LABEL_CPU, resources.cpu_cores),
        (LABEL_MEMORY, resources.memory_gb),
        (LABEL_DISK, resources.disk_gb),
    ];
    for (label, value) in entries {
        if let Some(value) = value {
            labels.insert(label.to_string(), value.to_string());
        }
    }
    labels
}

fn resources_from_labels(labels: &HashMap<String, String>) -> ResourceLimits {
    let get = |label: &str| labels.get(label).and_then(|v| v.parse::<f64>().ok());
    ResourceLimits {
        cpu_cores: get(LABEL_CPU),
        memory_gb: get(LABEL_MEMORY),
        disk_gb: get(LABEL_DISK),
    }
}

/// Body of `POST /containers/create`.
fn create_body(request: &CreateContainerRequest, network: &str) -> serde_json::Value {
    let network_mode = if request.ip_address.is_some() {
        network
    } else {
        "host"
    };
    let mut host_config = json!({ "NetworkMode": network_mode });
    if let Some(nano_cpus) = request.resources.nano_cpus() {
        host_config["NanoCpus"] = json!(nano_cpus);
    }
    if let Some(memory) = request.resources.memory_bytes() {
        host_config["Memory"] = json!(memory);
    }

    let mut body = json!({
        "Hostname": request.hostname.as_str(),
        "Image": request.image.as_str(),
        "Labels": resource_labels(&request.resources),
        "HostConfig": host_config,
    });

    if let Some(ip) = request.ip_address {
        let ipam = if ip.is_ipv6() {
            json!({ "IPv6Address": ip.to_string() })
        } else {
            json!({ "IPv4Address": ip.to_string() })
        };
        body["NetworkingConfig"] = json!({
            "EndpointsConfig": { network: { "IPAMConfig": ipam } }
        });
    }

    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    config: InspectConfig,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecInspect {
    exit_code: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecConfig<'a> {
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: &'a [String],
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<(), RuntimeError> {
        let path = format!("/containers/create?name={}", request.container_name);
        let body = create_body(request, &self.network);
        let (status, bytes) = self.request(Method::POST, &path, Some(body)).await?;

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(RuntimeError::Conflict(request.container_name.clone())),
            // 404 here means the image is missing, not the container.
            _ => Err(RuntimeError::Api {
                status: status.as_u16(),
                message: docker_message(&bytes),
            }),
        }
    }

    async fn start_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let path = format!("/containers/{name}/start");
        let (status, bytes) = self.request(Method::POST, &path, None).await?;
        Self::expect_success(name, status, &bytes)
    }

    async fn stop_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let path = format!("/containers/{name}/stop?t={STOP_TIMEOUT_SECS}");
        let (status, bytes) = self.request(Method::POST, &path, None).await?;
        Self::expect_success(name, status, &bytes)
    }

    async fn delete_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let path = format!("/containers/{name}?v=true");
        let (status, bytes) = self.request(Method::DELETE, &path, None).await?;
        Self::expect_success(name, status, &bytes)
    }

    async fn execute_in_container(
        &self,
        name: &ContainerName,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        let config = ExecConfig {
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: args,
        };
        let config =
            serde_json::to_value(&config).map_err(|e| RuntimeError::Transport(e.to_string()))?;

        let path = format!("/containers/{name}/exec");
        let (status, bytes) = self.request(Method::POST, &path, Some(config)).await?;
        if !status.is_success() {
            return Err(api_error(name, status, &bytes));
        }
        let created: ExecCreated =
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::Transport(e.to_string()))?;

        // With a TTY the output stream is raw, not multiplexed.
        let path = format!("/exec/{}/start", created.id);
        let start = json!({ "Detach": false, "Tty": true });
        let (status, output) = self.request(Method::POST, &path, Some(start)).await?;
        if !status.is_success() {
            return Err(api_error(name, status, &output));
        }

        let path = format!("/exec/{}/json", created.id);
        let (status, bytes) = self.request(Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(api_error(name, status, &bytes));
        }
        let inspect: ExecInspect =
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::Transport(e.to_string()))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output: String::from_utf8_lossy(&output).to_string(),
        })
    }

    async fn get_container(&self, name: &ContainerName) -> Result<Option<Container>, RuntimeError> {
        let path = format!("/containers/{name}/json");
        let (status, bytes) = self.request(Method::GET, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(api_error(name, status, &bytes));
        }

        let inspect: InspectResponse =
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let image = DockerImage::parse(&inspect.config.image)
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let labels = inspect.config.labels.unwrap_or_default();

        Ok(Some(Container {
            name: name.clone(),
            hostname: inspect
                .config
                .hostname
                .as_deref()
                .and_then(|h| HostName::parse(h).ok()),
            image,
            running: inspect.state.running,
            resources: resources_from_labels(&labels),
        }))
    }
}
