//! Node agent - converges one host's container to its node spec.
//!
//! One agent runs per hostname. Every tick re-reads the container from the
//! runtime and takes the next step towards the wanted node state:
//!
//! ```text
//! active:            (suspend -> stop ->) delete -> create -> probe -> resume
//! dirty:             suspend -> stop -> delete -> report ready
//! inactive:          suspend -> stop -> delete
//! everything else:   nothing
//! ```
//!
//! A step that fails aborts the tick. Orchestrator denial and a failing
//! readiness probe end the tick without error; the next tick picks up from
//! whatever the runtime reports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeadm_id::{DockerImage, HostName};
use nodeadm_reconcile::{BackoffPolicy, ConvergenceStatus, RetryGate, DEFAULT_TICK_INTERVAL};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::framework::{Actor, ActorContext, ActorError, ActorHandle};
use crate::error::AgentError;
use crate::node::{NodeAttributes, NodeSpec, NodeState};
use crate::operations::ContainerOperations;
use crate::orchestrator::{Orchestrator, SuspendDecision};
use crate::repository::NodeRepository;
use crate::runtime::{Container, ContainerStatus};

/// Mailbox capacity of one agent.
pub const AGENT_MAILBOX_SIZE: usize = 64;

// =============================================================================
// Configuration and Dependencies
// =============================================================================

/// Cadences of one node agent.
#[derive(Debug, Clone)]
pub struct NodeAgentConfig {
    /// Interval between periodic ticks.
    pub tick_interval: Duration,

    /// Backoff after the orchestrator denies or fails a suspend.
    pub suspend_backoff: BackoffPolicy,

    /// Backoff after a failed report to the node repository.
    pub report_backoff: BackoffPolicy,
}

impl Default for NodeAgentConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            suspend_backoff: BackoffPolicy::default(),
            report_backoff: BackoffPolicy::default(),
        }
    }
}

/// Clients shared by every agent on the host.
#[derive(Clone)]
pub struct AgentClients {
    pub operations: ContainerOperations,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub repository: Arc<dyn NodeRepository>,
}

// =============================================================================
// Messages
// =============================================================================

/// Messages handled by `NodeAgent`.
#[derive(Debug)]
pub enum NodeAgentMessage {
    /// Replace the wanted spec. Ticks immediately if it changed.
    SetNodeSpec(Box<NodeSpec>),

    /// Freeze or unfreeze the agent. Ticks immediately if it changed.
    Freeze(bool),
}

// =============================================================================
// Snapshot
// =============================================================================

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Introspection view of one agent, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeAgentSnapshot {
    pub hostname: HostName,
    pub node_state: NodeState,
    pub wanted_image: Option<DockerImage>,
    #[serde(serialize_with = "serialize_display")]
    pub status: ConvergenceStatus,
    pub container: ContainerStatus,
    pub container_image: Option<DockerImage>,
    pub probe_passed: bool,
    pub resumed: bool,
    pub frozen: bool,
    pub ticks: u64,
    pub last_error: Option<String>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl NodeAgentSnapshot {
    fn new(spec: &NodeSpec) -> Self {
        Self {
            hostname: spec.hostname.clone(),
            node_state: spec.node_state,
            wanted_image: spec.wanted_docker_image.clone(),
            status: ConvergenceStatus::Unknown,
            container: ContainerStatus::Absent,
            container_image: None,
            probe_passed: false,
            resumed: false,
            frozen: false,
            ticks: 0,
            last_error: None,
            last_tick_at: None,
        }
    }

    /// Active, running, probed and resumed in-container.
    pub fn is_serving(&self) -> bool {
        self.node_state == NodeState::Active
            && self.container == ContainerStatus::Running
            && self.resumed
    }
}

// =============================================================================
// Node Agent
// =============================================================================

/// Actor owning the container of one host.
pub struct NodeAgent {
    hostname: HostName,
    spec: NodeSpec,
    clients: AgentClients,
    config: NodeAgentConfig,

    wanted_frozen: bool,
    frozen: bool,

    // What the agent knows about the current container.
    container: ContainerStatus,
    container_image: Option<DockerImage>,
    probe_passed: bool,
    resumed: bool,

    orchestrator_resumed: bool,
    ready_reported: bool,
    restarted_generation: Option<i64>,
    published: Option<NodeAttributes>,

    suspend_gate: RetryGate,
    report_gate: RetryGate,

    ticks: u64,
    snapshot: watch::Sender<NodeAgentSnapshot>,
}

impl NodeAgent {
    /// Create an agent for `spec`, returning it with its snapshot receiver.
    pub fn new(
        spec: NodeSpec,
        clients: AgentClients,
        config: NodeAgentConfig,
        frozen: bool,
    ) -> (Self, watch::Receiver<NodeAgentSnapshot>) {
        let (snapshot, snapshot_rx) = watch::channel(NodeAgentSnapshot::new(&spec));
        let agent = Self {
            hostname: spec.hostname.clone(),
            suspend_gate: RetryGate::new(config.suspend_backoff.clone()),
            report_gate: RetryGate::new(config.report_backoff.clone()),
            spec,
            clients,
            config,
            wanted_frozen: frozen,
            frozen: false,
            container: ContainerStatus::Absent,
            container_image: None,
            probe_passed: false,
            resumed: false,
            orchestrator_resumed: false,
            ready_reported: false,
            restarted_generation: None,
            published: None,
            ticks: 0,
            snapshot,
        };
        (agent, snapshot_rx)
    }

    /// Replace the wanted spec. Returns whether anything changed.
    fn apply_spec(&mut self, spec: NodeSpec) -> bool {
        if spec == self.spec {
            return false;
        }
        if spec.node_state != self.spec.node_state {
            info!(
                hostname = %self.hostname,
                from = %self.spec.node_state,
                to = %spec.node_state,
                "Wanted node state changed"
            );
            self.ready_reported = false;
        }
        self.spec = spec;
        true
    }

    /// One convergence tick. Never fails; errors end up in the snapshot.
    async fn tick(&mut self) {
        self.ticks += 1;

        if self.frozen != self.wanted_frozen {
            self.frozen = self.wanted_frozen;
            info!(hostname = %self.hostname, frozen = self.frozen, "Agent freeze state changed");
        }

        let result = if self.frozen {
            Ok(ConvergenceStatus::Waiting)
        } else {
            self.converge().await
        };

        let (status, last_error) = match result {
            Ok(status) => {
                debug!(hostname = %self.hostname, status = %status, "Tick complete");
                (status, None)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(hostname = %self.hostname, error = %e, "Tick aborted, will retry");
                } else {
                    error!(hostname = %self.hostname, error = %e, "Tick aborted by unexpected failure");
                }
                (ConvergenceStatus::Converging, Some(e.to_string()))
            }
        };
        self.publish_snapshot(status, last_error);
    }

    fn publish_snapshot(&self, status: ConvergenceStatus, last_error: Option<String>) {
        self.snapshot.send_replace(NodeAgentSnapshot {
            hostname: self.hostname.clone(),
            node_state: self.spec.node_state,
            wanted_image: self.spec.wanted_docker_image.clone(),
            status,
            container: self.container,
            container_image: self.container_image.clone(),
            probe_passed: self.probe_passed,
            resumed: self.resumed,
            frozen: self.frozen,
            ticks: self.ticks,
            last_error,
            last_tick_at: Some(Utc::now()),
        });
    }

    async fn converge(&mut self) -> Result<ConvergenceStatus, AgentError> {
        let state = self.spec.node_state;
        if state != NodeState::Active && !state.wants_container_removed() {
            return Ok(ConvergenceStatus::Converged);
        }

        let container = self
            .clients
            .operations
            .get_container(&self.spec.container_name)
            .await?;
        self.observe(container.as_ref());

        if state == NodeState::Active {
            self.converge_active(container).await
        } else {
            self.converge_removed(container).await
        }
    }

    fn observe(&mut self, container: Option<&Container>) {
        match container {
            Some(c) => {
                self.container = c.status();
                self.container_image = Some(c.image.clone());
            }
            None => {
                self.container = ContainerStatus::Absent;
                self.container_image = None;
            }
        }
    }

    /// Forget everything learned about a container that is now gone or restarted.
    fn reset_container_progress(&mut self) {
        self.probe_passed = false;
        self.resumed = false;
    }

    async fn converge_active(
        &mut self,
        container: Option<Container>,
    ) -> Result<ConvergenceStatus, AgentError> {
        let Some(wanted_image) = self.spec.wanted_docker_image.clone() else {
            warn!(hostname = %self.hostname, "Active node has no wanted image, nothing to run");
            return Ok(ConvergenceStatus::Waiting);
        };
        let wanted_resources = self.spec.resource_limits();
        let name = self.spec.container_name.clone();

        let container = match container {
            Some(c) if c.image != wanted_image || c.resources != wanted_resources => {
                info!(
                    hostname = %self.hostname,
                    current_image = %c.image,
                    wanted_image = %wanted_image,
                    "Container does not match node spec, re-provisioning"
                );
                if !self.remove_container(&c).await? {
                    return Ok(ConvergenceStatus::Waiting);
                }
                None
            }
            other => other,
        };

        match container {
            None => {
                self.reset_container_progress();
                self.clients
                    .operations
                    .create_and_start(&self.spec, &wanted_image)
                    .await?;
                self.container = ContainerStatus::Running;
                self.container_image = Some(wanted_image.clone());
                // A fresh container runs the wanted generation.
                self.restarted_generation = self.spec.wanted_restart_generation;
            }
            Some(c) if !c.running => {
                self.reset_container_progress();
                self.clients.operations.start(&name).await?;
                self.container = ContainerStatus::Running;
            }
            Some(_) => {}
        }

        if !self.probe_passed {
            if !self.clients.operations.probe(&name).await? {
                debug!(hostname = %self.hostname, "Node not ready for resume yet");
                return Ok(ConvergenceStatus::Converging);
            }
            self.probe_passed = true;
        }

        if !self.resumed {
            self.clients.operations.resume_node(&name).await?;
            self.resumed = true;
        }

        if let Some(generation) = self.spec.pending_restart_generation() {
            if self.restarted_generation.is_none_or(|done| done < generation) {
                info!(hostname = %self.hostname, generation, "Restarting services for new restart generation");
                self.clients.operations.restart_services(&name).await?;
                self.restarted_generation = Some(generation);
            }
        }

        if !self.orchestrator_resumed {
            info!(hostname = %self.hostname, "Resuming node in orchestrator");
            self.clients.orchestrator.resume(&self.hostname).await?;
            self.orchestrator_resumed = true;
        }

        self.publish_attributes(wanted_image).await
    }

    async fn converge_removed(
        &mut self,
        container: Option<Container>,
    ) -> Result<ConvergenceStatus, AgentError> {
        if let Some(c) = container {
            if !self.remove_container(&c).await? {
                return Ok(ConvergenceStatus::Waiting);
            }
        }

        if self.spec.node_state == NodeState::Dirty && !self.ready_reported {
            let now = Instant::now();
            if let Err(deferred) = self.report_gate.check("ready report", now) {
                debug!(hostname = %self.hostname, reason = %deferred, "Skipping ready report");
                return Ok(ConvergenceStatus::Waiting);
            }
            if let Err(e) = self
                .clients
                .repository
                .update_node_state(&self.hostname, NodeState::Ready)
                .await
            {
                let delay = self.report_gate.record_failure(now);
                debug!(
                    hostname = %self.hostname,
                    failures = self.report_gate.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Ready report failed"
                );
                return Err(e.into());
            }
            self.report_gate.record_success();
            self.ready_reported = true;
            info!(hostname = %self.hostname, "Node cleaned up and reported ready");
        }

        Ok(ConvergenceStatus::Converged)
    }

    /// Suspend (if running), stop and delete a container.
    ///
    /// Returns false when the orchestrator did not allow the node to be
    /// taken out of service.
    async fn remove_container(&mut self, container: &Container) -> Result<bool, AgentError> {
        let name = &container.name;
        if container.running {
            if !self.request_suspend().await? {
                return Ok(false);
            }
            self.clients.operations.stop(name).await?;
            self.container = ContainerStatus::Stopped;
        }
        self.reset_container_progress();

        self.clients.operations.delete(name).await?;
        self.container = ContainerStatus::Absent;
        self.container_image = None;
        Ok(true)
    }

    async fn request_suspend(&mut self) -> Result<bool, AgentError> {
        let now = Instant::now();
        if let Err(deferred) = self.suspend_gate.check("suspend", now) {
            debug!(hostname = %self.hostname, reason = %deferred, "Skipping suspend request");
            return Ok(false);
        }

        match self.clients.orchestrator.suspend(&self.hostname).await {
            Ok(SuspendDecision::Granted) => {
                info!(hostname = %self.hostname, "Orchestrator granted suspend");
                self.suspend_gate.record_success();
                self.orchestrator_resumed = false;
                Ok(true)
            }
            Ok(SuspendDecision::Denied) => {
                let delay = self.suspend_gate.record_failure(now);
                warn!(
                    hostname = %self.hostname,
                    failures = self.suspend_gate.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Orchestrator denied suspend, keeping container running"
                );
                Ok(false)
            }
            Err(e) => {
                let delay = self.suspend_gate.record_failure(now);
                debug!(
                    hostname = %self.hostname,
                    failures = self.suspend_gate.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Suspend request failed"
                );
                Err(e.into())
            }
        }
    }

    async fn publish_attributes(
        &mut self,
        image: DockerImage,
    ) -> Result<ConvergenceStatus, AgentError> {
        let attributes = NodeAttributes {
            current_restart_generation: self
                .restarted_generation
                .or(self.spec.current_restart_generation),
            current_docker_image: Some(image),
        };
        if self.published.as_ref() == Some(&attributes) {
            return Ok(ConvergenceStatus::Converged);
        }

        let now = Instant::now();
        if let Err(deferred) = self.report_gate.check("attribute update", now) {
            debug!(hostname = %self.hostname, reason = %deferred, "Skipping attribute update");
            return Ok(ConvergenceStatus::Waiting);
        }
        if let Err(e) = self
            .clients
            .repository
            .update_node_attributes(&self.hostname, &attributes)
            .await
        {
            let delay = self.report_gate.record_failure(now);
            debug!(
                hostname = %self.hostname,
                failures = self.report_gate.failures(),
                retry_in_ms = delay.as_millis() as u64,
                "Attribute update failed"
            );
            return Err(e.into());
        }
        self.report_gate.record_success();
        info!(
            hostname = %self.hostname,
            restart_generation = ?attributes.current_restart_generation,
            "Published node attributes"
        );
        self.published = Some(attributes);
        Ok(ConvergenceStatus::Converged)
    }
}

#[async_trait]
impl Actor for NodeAgent {
    type Message = NodeAgentMessage;

    fn name(&self) -> &str {
        "node_agent"
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.config.tick_interval)
    }

    async fn on_start(&mut self, _ctx: &mut ActorContext) {
        info!(
            hostname = %self.hostname,
            container = %self.spec.container_name,
            state = %self.spec.node_state,
            "Node agent started"
        );
    }

    async fn handle(&mut self, msg: NodeAgentMessage, _ctx: &mut ActorContext) -> bool {
        match msg {
            NodeAgentMessage::SetNodeSpec(spec) => {
                if self.apply_spec(*spec) {
                    self.tick().await;
                }
            }
            NodeAgentMessage::Freeze(frozen) => {
                if self.wanted_frozen != frozen || self.frozen != frozen {
                    self.wanted_frozen = frozen;
                    self.tick().await;
                }
            }
        }
        true
    }

    async fn on_tick(&mut self, _ctx: &mut ActorContext) {
        self.tick().await;
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        info!(hostname = %self.hostname, ticks = self.ticks, "Node agent stopped");
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running node agent.
#[derive(Clone)]
pub struct NodeAgentHandle {
    hostname: HostName,
    actor: ActorHandle<NodeAgentMessage>,
    snapshot: watch::Receiver<NodeAgentSnapshot>,
}

impl NodeAgentHandle {
    pub fn new(
        hostname: HostName,
        actor: ActorHandle<NodeAgentMessage>,
        snapshot: watch::Receiver<NodeAgentSnapshot>,
    ) -> Self {
        Self {
            hostname,
            actor,
            snapshot,
        }
    }

    pub fn hostname(&self) -> &HostName {
        &self.hostname
    }

    /// Deliver a new spec without waiting for mailbox capacity.
    pub fn set_node_spec(&self, spec: NodeSpec) -> Result<(), ActorError> {
        self.actor
            .try_send(NodeAgentMessage::SetNodeSpec(Box::new(spec)))
    }

    pub fn freeze(&self, frozen: bool) -> Result<(), ActorError> {
        self.actor.try_send(NodeAgentMessage::Freeze(frozen))
    }

    pub fn snapshot(&self) -> NodeAgentSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Whether a tick has observed the latest freeze request.
    pub fn is_frozen(&self) -> bool {
        self.snapshot.borrow().frozen
    }

    /// Wait until `condition` holds for the agent's snapshot, or `timeout`
    /// elapses. Returns whether the condition was met.
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&NodeAgentSnapshot) -> bool,
    {
        let mut snapshot = self.snapshot.clone();
        let met = matches!(
            tokio::time::timeout(timeout, snapshot.wait_for(|s| condition(s))).await,
            Ok(Ok(_))
        );
        met
    }
}
