//! Orchestrator client.
//!
//! The orchestrator is the cluster-wide gate for taking nodes out of
//! service. The node agent asks it for permission before stopping a
//! container, and tells it when a node is back in service.

use std::time::Duration;

use async_trait::async_trait;
use nodeadm_id::HostName;
use thiserror::Error;
use tracing::{debug, error};

/// Errors from the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("orchestrator API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Answer to a suspend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendDecision {
    Granted,
    Denied,
}

/// Orchestrator interface.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Ask permission to take a single node out of service.
    async fn suspend(&self, hostname: &HostName) -> Result<SuspendDecision, OrchestratorError>;

    /// Ask permission to take a parent host and all its children out of service.
    async fn suspend_all(
        &self,
        parent: &HostName,
        hostnames: &[HostName],
    ) -> Result<SuspendDecision, OrchestratorError>;

    /// Put a node (or parent host) back in service.
    async fn resume(&self, hostname: &HostName) -> Result<(), OrchestratorError>;
}

/// HTTP orchestrator client.
pub struct OrchestratorClient {
    client: reqwest::Client,
    base_url: String,
}

impl OrchestratorClient {
    /// Create a new orchestrator client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn host_url(&self, hostname: &HostName) -> String {
        format!("{}/orchestrator/v1/hosts/{}/suspended", self.base_url, hostname)
    }
}

async fn decision_from(response: reqwest::Response) -> Result<SuspendDecision, OrchestratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(SuspendDecision::Granted);
    }
    if status == reqwest::StatusCode::CONFLICT {
        return Ok(SuspendDecision::Denied);
    }

    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "Orchestrator request failed");
    Err(OrchestratorError::Api {
        status: status.as_u16(),
        message: body,
    })
}

#[async_trait]
impl Orchestrator for OrchestratorClient {
    async fn suspend(&self, hostname: &HostName) -> Result<SuspendDecision, OrchestratorError> {
        let url = self.host_url(hostname);
        debug!(url = %url, "Requesting suspend");

        let response = self.client.put(&url).send().await?;
        decision_from(response).await
    }

    async fn suspend_all(
        &self,
        parent: &HostName,
        hostnames: &[HostName],
    ) -> Result<SuspendDecision, OrchestratorError> {
        let url = format!(
            "{}/orchestrator/v1/suspensions/hosts/{}",
            self.base_url, parent
        );
        let query: Vec<(&str, &str)> = hostnames
            .iter()
            .map(|h| ("hostname", h.as_str()))
            .collect();
        debug!(url = %url, children = hostnames.len(), "Requesting batch suspend");

        let response = self.client.put(&url).query(&query).send().await?;
        decision_from(response).await
    }

    async fn resume(&self, hostname: &HostName) -> Result<(), OrchestratorError> {
        let url = self.host_url(hostname);
        debug!(url = %url, "Requesting resume");

        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Orchestrator resume failed");
        Err(OrchestratorError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}
