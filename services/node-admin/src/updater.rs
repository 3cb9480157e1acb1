//! Node admin state updater - the top-level scheduler.
//!
//! Polls the node repository on a fixed interval and feeds the spec list to
//! `NodeAdmin::refresh`, unless the admin has been told to suspend. Moving
//! between `Resumed` and `Suspended` freezes or unfreezes every agent and
//! tells the orchestrator about the parent host.

use std::sync::Arc;
use std::time::Duration;

use nodeadm_id::HostName;
use nodeadm_reconcile::DEFAULT_POLL_INTERVAL;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::admin::NodeAdmin;
use crate::orchestrator::{Orchestrator, OrchestratorError, SuspendDecision};
use crate::repository::NodeRepository;

/// Operational mode of the whole node admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminState {
    /// Agents converge normally.
    Resumed,
    /// Agents are frozen and the parent host is suspended in the orchestrator.
    Suspended,
}

impl std::fmt::Display for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resumed => f.write_str("RESUMED"),
            Self::Suspended => f.write_str("SUSPENDED"),
        }
    }
}

/// Why the wanted admin state has not been reached yet.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("not all node agents are frozen yet")]
    NotAllFrozen,

    #[error("orchestrator denied suspending {0}")]
    SuspendDenied(HostName),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("node admin has been deconstructed")]
    Deconstructed,
}

/// Updater configuration.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// The host whose child nodes this admin manages.
    pub parent_hostname: HostName,

    /// Interval between node repository fetches.
    pub poll_interval: Duration,
}

impl UpdaterConfig {
    pub fn new(parent_hostname: HostName) -> Self {
        Self {
            parent_hostname,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Top-level scheduler driving a `NodeAdmin`.
pub struct NodeAdminStateUpdater {
    config: UpdaterConfig,
    orchestrator: Arc<dyn Orchestrator>,
    node_admin: Arc<Mutex<NodeAdmin>>,
    wanted_state: watch::Sender<AdminState>,
    current_state: Mutex<AdminState>,
    shutdown_tx: watch::Sender<bool>,
    poll_task: Option<JoinHandle<()>>,
}

impl NodeAdminStateUpdater {
    /// Start polling `repository` and driving `node_admin`.
    pub fn start(
        config: UpdaterConfig,
        repository: Arc<dyn NodeRepository>,
        orchestrator: Arc<dyn Orchestrator>,
        node_admin: NodeAdmin,
    ) -> Self {
        let node_admin = Arc::new(Mutex::new(node_admin));
        let (wanted_state, wanted_rx) = watch::channel(AdminState::Resumed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poll_task = tokio::spawn(run_poll_loop(
            config.poll_interval,
            repository,
            Arc::clone(&node_admin),
            wanted_rx,
            shutdown_rx,
        ));

        info!(
            parent_hostname = %config.parent_hostname,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Node admin state updater started"
        );

        Self {
            config,
            orchestrator,
            node_admin,
            wanted_state,
            current_state: Mutex::new(AdminState::Resumed),
            shutdown_tx,
            poll_task: Some(poll_task),
        }
    }

    /// Move towards `wanted`, returning `Ok(())` once it has been reached.
    ///
    /// Safe to call repeatedly; callers retry until it succeeds.
    pub async fn set_resume_state_and_check_if_resumed(
        &self,
        wanted: AdminState,
    ) -> Result<(), UpdaterError> {
        if *self.shutdown_tx.borrow() {
            return Err(UpdaterError::Deconstructed);
        }

        // Serializes concurrent transitions.
        let mut current = self.current_state.lock().await;
        self.wanted_state.send_replace(wanted);
        if *current == wanted {
            return Ok(());
        }

        let parent = &self.config.parent_hostname;
        match wanted {
            AdminState::Resumed => {
                self.node_admin.lock().await.unfreeze();
                self.orchestrator.resume(parent).await?;
            }
            AdminState::Suspended => {
                let hosts = {
                    let mut admin = self.node_admin.lock().await;
                    if !admin.freeze_and_check_if_all_frozen() {
                        return Err(UpdaterError::NotAllFrozen);
                    }
                    admin.get_list_of_hosts()
                };
                match self.orchestrator.suspend_all(parent, &hosts).await? {
                    SuspendDecision::Granted => {}
                    SuspendDecision::Denied => {
                        warn!(parent_hostname = %parent, "Orchestrator denied suspending host");
                        return Err(UpdaterError::SuspendDenied(parent.clone()));
                    }
                }
            }
        }

        info!(from = %*current, to = %wanted, "Node admin state changed");
        *current = wanted;
        Ok(())
    }

    /// The mode most recently reached.
    pub async fn current_state(&self) -> AdminState {
        *self.current_state.lock().await
    }

    pub async fn get_list_of_hosts(&self) -> Vec<HostName> {
        self.node_admin.lock().await.get_list_of_hosts()
    }

    /// Shared access to the node admin.
    pub fn node_admin(&self) -> &Arc<Mutex<NodeAdmin>> {
        &self.node_admin
    }

    /// Introspection view of the updater and all agents.
    pub async fn debug_info(&self) -> serde_json::Value {
        let wanted = *self.wanted_state.borrow();
        let current = *self.current_state.lock().await;
        let admin = self.node_admin.lock().await;
        json!({
            "parentHostname": self.config.parent_hostname,
            "wantedState": wanted,
            "currentState": current,
            "frozen": admin.is_frozen(),
            "hosts": admin.get_list_of_hosts(),
            "agents": admin.snapshots(),
        })
    }

    /// Stop polling, then stop every agent.
    ///
    /// No client call is issued once this returns.
    pub async fn deconstruct(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.poll_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Poll loop panicked");
            }
        }
        self.node_admin.lock().await.deconstruct().await;
        info!("Node admin state updater deconstructed");
    }
}

async fn run_poll_loop(
    poll_interval: Duration,
    repository: Arc<dyn NodeRepository>,
    node_admin: Arc<Mutex<NodeAdmin>>,
    wanted_state: watch::Receiver<AdminState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Poll loop shutting down");
                    break;
                }
            }

            _ = interval.tick() => {
                if *wanted_state.borrow() == AdminState::Suspended {
                    debug!("Node admin suspended, skipping refresh");
                    continue;
                }
                match repository.get_node_specs().await {
                    Ok(specs) => node_admin.lock().await.refresh(specs).await,
                    Err(e) => warn!(error = %e, "Failed to fetch node specs, will retry"),
                }
            }
        }
    }
}
