//! Node admin
//!
//! Runs on each physical host. Polls the node repository for the host's
//! child nodes and converges one container per node, coordinating with the
//! orchestrator before taking any node out of service.

use std::sync::Arc;

use anyhow::{Context, Result};
use nodeadm_node_admin::actors::AgentClients;
use nodeadm_node_admin::docker::DockerRuntime;
use nodeadm_node_admin::environment::{Environment, SystemResolver};
use nodeadm_node_admin::operations::ContainerOperations;
use nodeadm_node_admin::orchestrator::OrchestratorClient;
use nodeadm_node_admin::repository::NodeRepositoryClient;
use nodeadm_node_admin::{Config, NodeAdmin, NodeAdminStateUpdater};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        parent_hostname = %config.parent_hostname,
        node_repository_url = %config.node_repository_url,
        orchestrator_url = %config.orchestrator_url,
        docker_socket = %config.docker_socket,
        docker_network = %config.docker_network,
        "Starting node admin"
    );

    let runtime = DockerRuntime::new(&config.docker_socket).with_network(config.docker_network.clone());
    if !runtime.socket_exists() {
        warn!(docker_socket = %config.docker_socket, "Docker socket not found, agents will retry");
    }

    let mut environment = Environment::new(
        config.network_type,
        config.environment.clone(),
        config.region.clone(),
        Arc::new(SystemResolver),
    );
    if let Some(zone) = &config.zone {
        environment = environment.with_zone(zone.clone());
    }

    let repository = Arc::new(
        NodeRepositoryClient::new(config.node_repository_url.clone(), config.parent_hostname.clone())
            .context("failed to build node repository client")?,
    );
    let orchestrator = Arc::new(
        OrchestratorClient::new(config.orchestrator_url.clone())
            .context("failed to build orchestrator client")?,
    );

    let clients = AgentClients {
        operations: ContainerOperations::new(Arc::new(runtime), environment)
            .with_node_ctl(config.node_ctl.clone()),
        orchestrator: orchestrator.clone(),
        repository: repository.clone(),
    };
    let node_admin = NodeAdmin::new(clients, config.agent_config());
    let mut updater =
        NodeAdminStateUpdater::start(config.updater_config(), repository, orchestrator, node_admin);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    updater.deconstruct().await;

    info!("Node admin shutdown complete");
    Ok(())
}
