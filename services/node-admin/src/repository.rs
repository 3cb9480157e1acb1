//! Node repository client.
//!
//! Provides methods for communicating with the node repository:
//! - Fetching the desired node specs for all children of this host
//! - Reporting node state transitions (e.g. `dirty` -> `ready`)
//! - Publishing node attributes (current restart generation and image)

use std::time::Duration;

use async_trait::async_trait;
use nodeadm_id::{ContainerName, DockerImage, HostName, IdError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::node::{NodeAttributes, NodeSpec, NodeState, Owner};

/// Errors from the node repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node repository API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid node from repository: {0}")]
    InvalidNode(#[from] IdError),
}

/// Node repository interface.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Desired specs for every node assigned to this host.
    async fn get_node_specs(&self) -> Result<Vec<NodeSpec>, RepositoryError>;

    /// Desired spec for a single node.
    async fn get_node_spec(&self, hostname: &HostName) -> Result<Option<NodeSpec>, RepositoryError>;

    /// Move a node to a new lifecycle state.
    async fn update_node_state(
        &self,
        hostname: &HostName,
        state: NodeState,
    ) -> Result<(), RepositoryError>;

    /// Publish attributes observed by the agent.
    async fn update_node_attributes(
        &self,
        hostname: &HostName,
        attributes: &NodeAttributes,
    ) -> Result<(), RepositoryError>;
}

/// Node as returned by the repository's `nodes/v2` API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub hostname: String,
    #[serde(default)]
    pub wanted_docker_image: Option<String>,
    pub state: NodeState,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub restart_generation: Option<i64>,
    #[serde(default)]
    pub current_restart_generation: Option<i64>,
    #[serde(default)]
    pub min_cpu_cores: Option<f64>,
    #[serde(default)]
    pub min_main_memory_available_gb: Option<f64>,
    #[serde(default)]
    pub min_disk_available_gb: Option<f64>,
}

fn default_node_type() -> String {
    "tenant".to_string()
}

impl TryFrom<RepositoryNode> for NodeSpec {
    type Error = RepositoryError;

    fn try_from(node: RepositoryNode) -> Result<Self, Self::Error> {
        let hostname = HostName::parse(&node.hostname)?;
        let container_name = ContainerName::from_hostname(&hostname);
        let wanted_docker_image = node
            .wanted_docker_image
            .as_deref()
            .map(DockerImage::parse)
            .transpose()?;

        Ok(NodeSpec {
            hostname,
            wanted_docker_image,
            container_name,
            node_state: node.state,
            node_type: node.node_type,
            node_flavor: node.flavor,
            owner: node.owner,
            wanted_restart_generation: node.restart_generation,
            current_restart_generation: node.current_restart_generation,
            min_cpu_cores: node.min_cpu_cores,
            min_main_memory_available_gb: node.min_main_memory_available_gb,
            min_disk_available_gb: node.min_disk_available_gb,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NodeList {
    nodes: Vec<RepositoryNode>,
}

/// HTTP node repository client.
pub struct NodeRepositoryClient {
    client: reqwest::Client,
    base_url: String,
    parent_hostname: HostName,
}

impl NodeRepositoryClient {
    /// Create a new node repository client for the children of `parent_hostname`.
    pub fn new(
        base_url: impl Into<String>,
        parent_hostname: HostName,
    ) -> Result<Self, RepositoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            parent_hostname,
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, RepositoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Failed to {what}");
        Err(RepositoryError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl NodeRepository for NodeRepositoryClient {
    async fn get_node_specs(&self) -> Result<Vec<NodeSpec>, RepositoryError> {
        let url = format!("{}/nodes/v2/node/", self.base_url);
        debug!(url = %url, parent = %self.parent_hostname, "Fetching node specs");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("parentHost", self.parent_hostname.as_str()),
                ("recursive", "true"),
            ])
            .send()
            .await?;
        let list: NodeList = Self::check(response, "fetch node specs").await?.json().await?;

        let mut specs = Vec::with_capacity(list.nodes.len());
        for node in list.nodes {
            let hostname = node.hostname.clone();
            match NodeSpec::try_from(node) {
                Ok(spec) => specs.push(spec),
                // One malformed entry must not hide the other nodes.
                Err(e) => warn!(hostname = %hostname, error = %e, "Skipping invalid node"),
            }
        }

        debug!(node_count = specs.len(), "Fetched node specs");
        Ok(specs)
    }

    async fn get_node_spec(&self, hostname: &HostName) -> Result<Option<NodeSpec>, RepositoryError> {
        let url = format!("{}/nodes/v2/node/{}", self.base_url, hostname);
        debug!(url = %url, "Fetching node spec");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let node: RepositoryNode = Self::check(response, "fetch node spec").await?.json().await?;
        NodeSpec::try_from(node).map(Some)
    }

    async fn update_node_state(
        &self,
        hostname: &HostName,
        state: NodeState,
    ) -> Result<(), RepositoryError> {
        let url = format!("{}/nodes/v2/state/{}/{}", self.base_url, state, hostname);
        debug!(hostname = %hostname, state = %state, "Updating node state");

        let response = self.client.put(&url).send().await?;
        Self::check(response, "update node state").await?;
        Ok(())
    }

    async fn update_node_attributes(
        &self,
        hostname: &HostName,
        attributes: &NodeAttributes,
    ) -> Result<(), RepositoryError> {
        let url = format!("{}/nodes/v2/node/{}", self.base_url, hostname);
        debug!(hostname = %hostname, ?attributes, "Updating node attributes");

        let response = self.client.patch(&url).json(attributes).send().await?;
        Self::check(response, "update node attributes").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NodeRepositoryClient {
        NodeRepositoryClient::new(server.uri(), HostName::parse("parent1").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_get_node_specs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/v2/node/"))
            .and(query_param("parentHost", "parent1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nodes": [
                    {
                        "hostname": "host1.example.com",
                        "wantedDockerImage": "registry/vespa:6.1",
                        "state": "active",
                        "type": "tenant",
                        "owner": { "tenant": "t", "application": "a", "instance": "default" },
                        "restartGeneration": 2,
                        "currentRestartGeneration": 1,
                        "minCpuCores": 1.0,
                        "minMainMemoryAvailableGb": 4.0,
                        "minDiskAvailableGb": 50.0
                    },
                    { "hostname": "bad host", "state": "active" },
                    { "hostname": "host2.example.com", "state": "dirty" }
                ]
            })))
            .mount(&server)
            .await;

        let specs = client(&server).get_node_specs().await.unwrap();
        assert_eq!(specs.len(), 2);

        let first = &specs[0];
        assert_eq!(first.hostname.as_str(), "host1.example.com");
        assert_eq!(first.container_name.as_str(), "host1");
        assert_eq!(first.node_state, NodeState::Active);
        assert_eq!(first.pending_restart_generation(), Some(2));
        assert_eq!(first.resource_limits().memory_gb, Some(4.0));

        assert_eq!(specs[1].node_state, NodeState::Dirty);
        assert_eq!(specs[1].wanted_docker_image, None);
    }

    #[tokio::test]
    async fn test_get_node_spec_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/v2/node/host9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let host = HostName::parse("host9").unwrap();
        assert!(client(&server).get_node_spec(&host).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_node_state() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/nodes/v2/state/ready/host1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let host = HostName::parse("host1").unwrap();
        client(&server)
            .update_node_state(&host, NodeState::Ready)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_node_state_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let host = HostName::parse("host1").unwrap();
        let err = client(&server)
            .update_node_state(&host, NodeState::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_update_node_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/nodes/v2/node/host1"))
            .and(body_json(serde_json::json!({
                "currentRestartGeneration": 2,
                "currentDockerImage": "registry/vespa:6.1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let host = HostName::parse("host1").unwrap();
        let attributes = NodeAttributes {
            current_restart_generation: Some(2),
            current_docker_image: Some(DockerImage::parse("registry/vespa:6.1").unwrap()),
        };
        client(&server)
            .update_node_attributes(&host, &attributes)
            .await
            .unwrap();
    }
}
