//! Shared harness: a node admin wired to in-memory clients.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use nodeadm_id::{ContainerName, DockerImage, HostName};
use nodeadm_node_admin::actors::{AgentClients, NodeAgentConfig};
use nodeadm_node_admin::environment::{Environment, NetworkType};
use nodeadm_node_admin::mock::{CallLog, MockNodeRepository, MockOrchestrator, MockRuntime, StaticResolver};
use nodeadm_node_admin::operations::ContainerOperations;
use nodeadm_node_admin::{NodeAdmin, NodeAdminStateUpdater, NodeSpec, NodeState, UpdaterConfig};
use nodeadm_reconcile::BackoffPolicy;

pub const WAIT: Duration = Duration::from_secs(10);

pub const PROBE: &str =
    "executeInContainer with ContainerName: container, args: [/usr/bin/env, test, -x, /opt/vespa/bin/vespa-nodectl]";
pub const RESUME: &str =
    "executeInContainer with ContainerName: container, args: [/opt/vespa/bin/vespa-nodectl, resume]";
pub const STOP: &str = "stopContainer with ContainerName: container";
pub const DELETE: &str = "deleteContainer with ContainerName: container";
pub const READY: &str = "updateNodeState with HostName: host1, state: ready";

pub fn hostname(name: &str) -> HostName {
    HostName::parse(name).unwrap()
}

pub fn image(name: &str) -> DockerImage {
    DockerImage::parse(name).unwrap()
}

pub fn create_entry(image: &str, host: &str, container: &str) -> String {
    format!("createContainerCommand with DockerImage: {image}, HostName: {host}, ContainerName: {container}")
}

/// Spec for `host1` running in `container`.
pub fn node_spec(state: NodeState, wanted_image: &str) -> NodeSpec {
    NodeSpec::new(hostname("host1"), ContainerName::parse("container").unwrap(), state)
        .with_image(image(wanted_image))
}

pub struct Harness {
    pub log: CallLog,
    pub runtime: Arc<MockRuntime>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub repository: Arc<MockNodeRepository>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            runtime: Arc::new(MockRuntime::new(log.clone())),
            orchestrator: Arc::new(MockOrchestrator::new(log.clone())),
            repository: Arc::new(MockNodeRepository::new(log.clone())),
            log,
        }
    }

    pub fn clients(&self) -> AgentClients {
        let environment = Environment::new(
            NetworkType::Normal,
            "dev",
            "default",
            Arc::new(StaticResolver::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))),
        );
        AgentClients {
            operations: ContainerOperations::new(self.runtime.clone(), environment),
            orchestrator: self.orchestrator.clone(),
            repository: self.repository.clone(),
        }
    }

    /// Agent cadences fast enough for tests.
    pub fn agent_config() -> NodeAgentConfig {
        NodeAgentConfig {
            tick_interval: Duration::from_millis(10),
            suspend_backoff: BackoffPolicy::fixed_ratio(Duration::from_millis(5), Duration::from_millis(20)),
            report_backoff: BackoffPolicy::fixed_ratio(Duration::from_millis(5), Duration::from_millis(20)),
        }
    }

    pub fn node_admin(&self) -> NodeAdmin {
        NodeAdmin::new(self.clients(), Self::agent_config())
    }

    pub fn start_updater(&self) -> NodeAdminStateUpdater {
        let config = UpdaterConfig {
            parent_hostname: hostname("parent"),
            poll_interval: Duration::from_millis(10),
        };
        NodeAdminStateUpdater::start(
            config,
            self.repository.clone(),
            self.orchestrator.clone(),
            self.node_admin(),
        )
    }
}

/// Check the per-container ordering rules over a whole call log:
/// stop and delete only after a create, delete of a running container only
/// after its stop, and every stop directly preceded (among that host's
/// suspend requests) by a granted suspend.
pub fn assert_ordering_invariants(entries: &[String], host: &str, container: &str) {
    let create = "createContainerCommand with DockerImage: ";
    let create_suffix = format!("ContainerName: {container}");
    let start = format!("startContainer with ContainerName: {container}");
    let stop = format!("stopContainer with ContainerName: {container}");
    let delete = format!("deleteContainer with ContainerName: {container}");
    let suspend = format!("suspend with HostName: {host}: ");

    let mut created = false;
    let mut running = false;
    let mut suspend_granted = false;
    for entry in entries {
        if entry.starts_with(create) && entry.ends_with(&create_suffix) {
            created = true;
        } else if *entry == start {
            running = true;
        } else if entry.starts_with(&suspend) {
            suspend_granted = entry.ends_with("granted");
        } else if *entry == stop {
            assert!(created, "stop before create: {entries:#?}");
            assert!(suspend_granted, "stop without granted suspend: {entries:#?}");
            suspend_granted = false;
            running = false;
        } else if *entry == delete {
            assert!(created, "delete before create: {entries:#?}");
            assert!(!running, "delete of running container: {entries:#?}");
            created = false;
        }
    }
}
