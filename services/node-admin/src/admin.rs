//! Node admin - owns the population of node agents on this host.
//!
//! `refresh` is the only place agents are created or destroyed: one agent per
//! hostname in the latest spec list, nothing else.

use std::collections::HashMap;

use nodeadm_id::HostName;
use tracing::{debug, info, warn};

use crate::actors::{
    AgentClients, NodeAgent, NodeAgentConfig, NodeAgentHandle, NodeAgentSnapshot, Supervisor,
    AGENT_MAILBOX_SIZE,
};
use crate::node::NodeSpec;

/// Manages the node agents of one parent host.
pub struct NodeAdmin {
    clients: AgentClients,
    agent_config: NodeAgentConfig,
    agents: HashMap<HostName, NodeAgentHandle>,
    supervisor: Supervisor<HostName>,
    frozen: bool,
}

impl NodeAdmin {
    pub fn new(clients: AgentClients, agent_config: NodeAgentConfig) -> Self {
        Self {
            clients,
            agent_config,
            agents: HashMap::new(),
            supervisor: Supervisor::new(),
            frozen: false,
        }
    }

    /// Bring the agent population in line with `specs`.
    ///
    /// Starts agents for new hostnames, stops agents whose hostname is gone,
    /// and forwards the spec to every other agent.
    pub async fn refresh(&mut self, specs: Vec<NodeSpec>) {
        let mut wanted: HashMap<HostName, NodeSpec> = HashMap::with_capacity(specs.len());
        for spec in specs {
            if let Some(previous) = wanted.insert(spec.hostname.clone(), spec) {
                warn!(hostname = %previous.hostname, "Duplicate node spec, using the last one");
            }
        }

        let removed: Vec<HostName> = self
            .agents
            .keys()
            .filter(|hostname| !wanted.contains_key(*hostname))
            .cloned()
            .collect();
        for hostname in removed {
            self.stop_agent(&hostname).await;
        }

        for (hostname, spec) in wanted {
            let Some(handle) = self.agents.get(&hostname) else {
                self.start_agent(spec);
                continue;
            };

            if !self.supervisor.is_running(&hostname) {
                warn!(hostname = %hostname, "Node agent is no longer running, restarting it");
                self.stop_agent(&hostname).await;
                self.start_agent(spec);
                continue;
            }

            if let Err(e) = handle.set_node_spec(spec) {
                // The next refresh delivers a fresh spec anyway.
                warn!(hostname = %hostname, error = %e, "Could not deliver node spec");
            }
        }

        debug!(agents = self.agents.len(), "Node admin refreshed");
    }

    fn start_agent(&mut self, spec: NodeSpec) {
        let hostname = spec.hostname.clone();
        let (agent, snapshot) = NodeAgent::new(
            spec,
            self.clients.clone(),
            self.agent_config.clone(),
            self.frozen,
        );
        let actor = self
            .supervisor
            .spawn(hostname.clone(), agent, AGENT_MAILBOX_SIZE);
        self.agents
            .insert(hostname.clone(), NodeAgentHandle::new(hostname.clone(), actor, snapshot));
        info!(hostname = %hostname, frozen = self.frozen, "Started node agent");
    }

    async fn stop_agent(&mut self, hostname: &HostName) {
        self.agents.remove(hostname);
        if self.supervisor.stop(hostname).await {
            info!(hostname = %hostname, "Stopped node agent");
        }
    }

    /// Hostnames with a live agent, sorted.
    pub fn get_list_of_hosts(&self) -> Vec<HostName> {
        let mut hosts: Vec<HostName> = self.agents.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub fn agent(&self, hostname: &HostName) -> Option<&NodeAgentHandle> {
        self.agents.get(hostname)
    }

    /// Ask every agent to freeze, returning whether all of them have.
    ///
    /// Agents created while the admin is frozen start frozen.
    pub fn freeze_and_check_if_all_frozen(&mut self) -> bool {
        if !self.frozen {
            info!(agents = self.agents.len(), "Freezing node agents");
            self.frozen = true;
        }

        let mut all_frozen = true;
        for handle in self.agents.values() {
            if handle.is_frozen() {
                continue;
            }
            all_frozen = false;
            if let Err(e) = handle.freeze(true) {
                warn!(hostname = %handle.hostname(), error = %e, "Could not freeze node agent");
            }
        }
        all_frozen
    }

    /// Let every agent converge again.
    pub fn unfreeze(&mut self) {
        if self.frozen {
            info!(agents = self.agents.len(), "Unfreezing node agents");
            self.frozen = false;
        }
        for handle in self.agents.values() {
            if let Err(e) = handle.freeze(false) {
                warn!(hostname = %handle.hostname(), error = %e, "Could not unfreeze node agent");
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Latest snapshot of every agent, sorted by hostname.
    pub fn snapshots(&self) -> Vec<NodeAgentSnapshot> {
        let mut snapshots: Vec<NodeAgentSnapshot> =
            self.agents.values().map(NodeAgentHandle::snapshot).collect();
        snapshots.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        snapshots
    }

    /// Stop every agent and wait for in-flight ticks to finish.
    ///
    /// No agent issues another client call once this returns.
    pub async fn deconstruct(&mut self) {
        info!(agents = self.agents.len(), "Deconstructing node admin");
        self.agents.clear();
        self.supervisor.stop_all().await;
    }
}
