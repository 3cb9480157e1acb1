//! Configuration for the node admin.

use std::time::Duration;

use anyhow::{Context, Result};
use nodeadm_id::HostName;
use nodeadm_reconcile::{
    BackoffPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX,
    DEFAULT_TICK_INTERVAL,
};

use crate::actors::NodeAgentConfig;
use crate::docker::{DEFAULT_DOCKER_NETWORK, DEFAULT_DOCKER_SOCKET};
use crate::environment::NetworkType;
use crate::operations::DEFAULT_NODE_CTL;
use crate::updater::UpdaterConfig;

/// Node admin configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The physical host whose child nodes are managed.
    pub parent_hostname: HostName,

    /// Node repository API URL.
    pub node_repository_url: String,

    /// Orchestrator API URL.
    pub orchestrator_url: String,

    /// Docker Engine socket.
    pub docker_socket: String,

    /// Docker network containers with an assigned address are attached to.
    pub docker_network: String,

    /// Node control program run inside containers.
    pub node_ctl: String,

    /// Interval between node repository fetches.
    pub poll_interval: Duration,

    /// Interval between ticks of each node agent.
    pub tick_interval: Duration,

    /// Backoff after the orchestrator denies a suspend.
    pub suspend_backoff: BackoffPolicy,

    /// Backoff after a failed report to the node repository.
    pub report_backoff: BackoffPolicy,

    pub network_type: NetworkType,
    pub environment: String,
    pub region: String,
    pub zone: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("NODE_ADMIN_{name}"));

        let parent_hostname = match var("PARENT_HOSTNAME") {
            Some(name) => name,
            None => system_hostname(),
        };
        let parent_hostname = HostName::parse(parent_hostname.trim())
            .with_context(|| format!("invalid parent hostname {parent_hostname:?}"))?;

        let node_repository_url =
            var("NODE_REPOSITORY_URL").unwrap_or_else(|| "http://127.0.0.1:4080".to_string());
        let orchestrator_url =
            var("ORCHESTRATOR_URL").unwrap_or_else(|| "http://127.0.0.1:19071".to_string());
        let docker_socket =
            var("DOCKER_SOCKET").unwrap_or_else(|| DEFAULT_DOCKER_SOCKET.to_string());
        let docker_network =
            var("DOCKER_NETWORK").unwrap_or_else(|| DEFAULT_DOCKER_NETWORK.to_string());
        let node_ctl = var("NODE_CTL").unwrap_or_else(|| DEFAULT_NODE_CTL.to_string());

        let millis = |name: &str, default: Duration| -> Result<Duration> {
            match var(name) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("NODE_ADMIN_{name} must be milliseconds, got {value:?}")),
                None => Ok(default),
            }
        };

        let poll_interval = millis("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL)?;
        let tick_interval = millis("TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL)?;
        let suspend_backoff = BackoffPolicy {
            base: millis("SUSPEND_RETRY_BASE_MS", DEFAULT_RETRY_BASE)?,
            max: millis("SUSPEND_RETRY_MAX_MS", DEFAULT_RETRY_MAX)?,
            ..BackoffPolicy::default()
        };
        let report_backoff = BackoffPolicy {
            base: millis("REPORT_RETRY_BASE_MS", DEFAULT_RETRY_BASE)?,
            max: millis("REPORT_RETRY_MAX_MS", DEFAULT_RETRY_MAX)?,
            ..BackoffPolicy::default()
        };
        anyhow::ensure!(!poll_interval.is_zero(), "NODE_ADMIN_POLL_INTERVAL_MS must be positive");
        anyhow::ensure!(!tick_interval.is_zero(), "NODE_ADMIN_TICK_INTERVAL_MS must be positive");

        let network_type = match var("NETWORK_TYPE") {
            Some(value) => value
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("invalid NODE_ADMIN_NETWORK_TYPE")?,
            None => NetworkType::Normal,
        };

        Ok(Self {
            parent_hostname,
            node_repository_url,
            orchestrator_url,
            docker_socket,
            docker_network,
            node_ctl,
            poll_interval,
            tick_interval,
            suspend_backoff,
            report_backoff,
            network_type,
            environment: var("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()),
            region: var("REGION").unwrap_or_else(|| "default".to_string()),
            zone: var("ZONE"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn agent_config(&self) -> NodeAgentConfig {
        NodeAgentConfig {
            tick_interval: self.tick_interval,
            suspend_backoff: self.suspend_backoff.clone(),
            report_backoff: self.report_backoff.clone(),
        }
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            parent_hostname: self.parent_hostname.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

fn system_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
