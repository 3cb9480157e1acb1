//! In-memory collaborators for tests and local development.
//!
//! Every mock implements the same trait as its production counterpart and
//! appends the state-changing calls it receives to a shared `CallLog`, so
//! tests can assert on the cross-collaborator order of operations.
//! Read-only queries (container inspection, spec fetches) are not logged.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nodeadm_id::{ContainerName, HostName};
use tokio::sync::Notify;

use crate::environment::AddressResolver;
use crate::node::{NodeAttributes, NodeSpec, NodeState};
use crate::orchestrator::{Orchestrator, OrchestratorError, SuspendDecision};
use crate::repository::{NodeRepository, RepositoryError};
use crate::runtime::{
    Container, ContainerRuntime, CreateContainerRequest, ExecResult, RuntimeError,
};

/// Default time `assert_in_order` waits for the expected calls.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not hide the log from the others.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Call Log
// =============================================================================

#[derive(Default)]
struct CallLogInner {
    entries: Mutex<Vec<String>>,
    notify: Notify,
}

/// Shared, append-only log of calls made to mocks.
#[derive(Clone, Default)]
pub struct CallLog {
    inner: Arc<CallLogInner>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and wake waiters.
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.inner.entries).push(entry.into());
        self.inner.notify.notify_waiters();
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.inner.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries exactly equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        lock(&self.inner.entries)
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    /// Number of entries starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        lock(&self.inner.entries)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Whether `expected` occurs as a subsequence of the log.
    pub fn contains_in_order(&self, expected: &[&str]) -> bool {
        let entries = lock(&self.inner.entries);
        let mut remaining = entries.iter();
        expected
            .iter()
            .all(|wanted| remaining.any(|entry| entry == wanted))
    }

    /// Wait until `expected` occurs in order, or `timeout` elapses.
    pub async fn wait_for_in_order(&self, timeout: Duration, expected: &[&str]) -> bool {
        self.wait_until(timeout, |log| log.contains_in_order(expected))
            .await
    }

    /// Wait until `condition` holds for the log, or `timeout` elapses.
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&CallLog) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a record in between is not missed.
            notified.as_mut().enable();

            if condition(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return condition(self);
            }
        }
    }

    /// Test assertion: panics unless `expected` occurs in order within
    /// `DEFAULT_WAIT`. Use `wait_for_in_order` outside of tests.
    pub async fn assert_in_order(&self, message: &str, expected: &[&str]) {
        if !self.wait_for_in_order(DEFAULT_WAIT, expected).await {
            panic!(
                "{message}\nexpected in order: {expected:#?}\nactual calls: {:#?}",
                self.entries()
            );
        }
    }
}

// =============================================================================
// Runtime
// =============================================================================

#[derive(Default)]
struct RuntimeState {
    containers: HashMap<String, Container>,
    exec_exit_codes: HashMap<Vec<String>, i64>,
    failing_operations: HashMap<&'static str, u32>,
    last_create: Option<CreateContainerRequest>,
}

/// In-memory container runtime.
pub struct MockRuntime {
    log: CallLog,
    state: Mutex<RuntimeState>,
}

impl MockRuntime {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Current container with the given name, if any.
    pub fn container(&self, name: &str) -> Option<Container> {
        lock(&self.state).containers.get(name).cloned()
    }

    /// Insert a container directly, bypassing the log.
    pub fn insert_container(&self, container: Container) {
        lock(&self.state)
            .containers
            .insert(container.name.to_string(), container);
    }

    /// Make `command` exit with `exit_code` from now on.
    pub fn set_exec_exit_code(&self, command: Vec<String>, exit_code: i64) {
        lock(&self.state).exec_exit_codes.insert(command, exit_code);
    }

    /// Fail the next `times` calls of `operation` (e.g. `"stopContainer"`)
    /// with a transport error.
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        lock(&self.state).failing_operations.insert(operation, times);
    }

    pub fn last_create_request(&self) -> Option<CreateContainerRequest> {
        lock(&self.state).last_create.clone()
    }

    fn injected_failure(state: &mut RuntimeState, operation: &'static str) -> Result<(), RuntimeError> {
        match state.failing_operations.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RuntimeError::Transport(format!("injected {operation} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        Self::injected_failure(&mut state, "createContainer")?;

        let name = request.container_name.to_string();
        if state.containers.contains_key(&name) {
            return Err(RuntimeError::Conflict(request.container_name.clone()));
        }
        state.containers.insert(
            name,
            Container {
                name: request.container_name.clone(),
                hostname: Some(request.hostname.clone()),
                image: request.image.clone(),
                running: false,
                resources: request.resources,
            },
        );
        state.last_create = Some(request.clone());
        self.log.record(format!(
            "createContainerCommand with DockerImage: {}, HostName: {}, ContainerName: {}",
            request.image, request.hostname, request.container_name
        ));
        Ok(())
    }

    async fn start_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        Self::injected_failure(&mut state, "startContainer")?;

        let container = state
            .containers
            .get_mut(name.as_str())
            .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
        container.running = true;
        self.log
            .record(format!("startContainer with ContainerName: {name}"));
        Ok(())
    }

    async fn stop_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        Self::injected_failure(&mut state, "stopContainer")?;

        self.log
            .record(format!("stopContainer with ContainerName: {name}"));
        let container = state
            .containers
            .get_mut(name.as_str())
            .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
        container.running = false;
        Ok(())
    }

    async fn delete_container(&self, name: &ContainerName) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        Self::injected_failure(&mut state, "deleteContainer")?;

        self.log
            .record(format!("deleteContainer with ContainerName: {name}"));
        match state.containers.get(name.as_str()) {
            None => Err(RuntimeError::NotFound(name.clone())),
            Some(c) if c.running => Err(RuntimeError::Conflict(name.clone())),
            Some(_) => {
                state.containers.remove(name.as_str());
                Ok(())
            }
        }
    }

    async fn execute_in_container(
        &self,
        name: &ContainerName,
        args: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        let mut state = lock(&self.state);
        Self::injected_failure(&mut state, "executeInContainer")?;

        match state.containers.get(name.as_str()) {
            None => return Err(RuntimeError::NotFound(name.clone())),
            Some(c) if !c.running => return Err(RuntimeError::Conflict(name.clone())),
            Some(_) => {}
        }

        self.log.record(format!(
            "executeInContainer with ContainerName: {name}, args: [{}]",
            args.join(", ")
        ));
        Ok(ExecResult {
            exit_code: state.exec_exit_codes.get(args).copied().unwrap_or(0),
            output: String::new(),
        })
    }

    async fn get_container(&self, name: &ContainerName) -> Result<Option<Container>, RuntimeError> {
        Ok(lock(&self.state).containers.get(name.as_str()).cloned())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Orchestrator that grants every request unless told otherwise.
pub struct MockOrchestrator {
    log: CallLog,
    denied: Mutex<HashSet<HostName>>,
    deny_all: AtomicBool,
    failing_calls: AtomicU32,
}

impl MockOrchestrator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            denied: Mutex::new(HashSet::new()),
            deny_all: AtomicBool::new(false),
            failing_calls: AtomicU32::new(0),
        }
    }

    /// Deny (or stop denying) suspension of `hostname`.
    pub fn set_suspend_denied(&self, hostname: &HostName, denied: bool) {
        let mut set = lock(&self.denied);
        if denied {
            set.insert(hostname.clone());
        } else {
            set.remove(hostname);
        }
    }

    /// Deny (or stop denying) every suspend request.
    pub fn set_deny_all(&self, denied: bool) {
        self.deny_all.store(denied, Ordering::SeqCst);
    }

    /// Fail the next `times` calls with a server error.
    pub fn fail_next(&self, times: u32) {
        self.failing_calls.store(times, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), OrchestratorError> {
        let taken = self
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(OrchestratorError::Api {
                status: 503,
                message: "injected orchestrator failure".to_string(),
            }),
            Err(_) => Ok(()),
        }
    }

    fn decision_for(&self, hostname: &HostName) -> SuspendDecision {
        if self.deny_all.load(Ordering::SeqCst) || lock(&self.denied).contains(hostname) {
            SuspendDecision::Denied
        } else {
            SuspendDecision::Granted
        }
    }
}

fn decision_name(decision: SuspendDecision) -> &'static str {
    match decision {
        SuspendDecision::Granted => "granted",
        SuspendDecision::Denied => "denied",
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn suspend(&self, hostname: &HostName) -> Result<SuspendDecision, OrchestratorError> {
        self.injected_failure()?;
        let decision = self.decision_for(hostname);
        self.log.record(format!(
            "suspend with HostName: {hostname}: {}",
            decision_name(decision)
        ));
        Ok(decision)
    }

    async fn suspend_all(
        &self,
        parent: &HostName,
        hostnames: &[HostName],
    ) -> Result<SuspendDecision, OrchestratorError> {
        self.injected_failure()?;
        let decision = self.decision_for(parent);
        let children: Vec<&str> = hostnames.iter().map(HostName::as_str).collect();
        self.log.record(format!(
            "suspendAll with Parent: {parent}, HostNames: [{}]: {}",
            children.join(", "),
            decision_name(decision)
        ));
        Ok(decision)
    }

    async fn resume(&self, hostname: &HostName) -> Result<(), OrchestratorError> {
        self.injected_failure()?;
        self.log.record(format!("resume with HostName: {hostname}"));
        Ok(())
    }
}

// =============================================================================
// Node Repository
// =============================================================================

/// In-memory node repository.
///
/// `update_node_state` changes the stored spec, the way the real repository
/// moves a node to its new state.
pub struct MockNodeRepository {
    log: CallLog,
    specs: Mutex<BTreeMap<HostName, NodeSpec>>,
    failing_fetches: AtomicU32,
    failing_updates: AtomicU32,
}

impl MockNodeRepository {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            specs: Mutex::new(BTreeMap::new()),
            failing_fetches: AtomicU32::new(0),
            failing_updates: AtomicU32::new(0),
        }
    }

    /// Add or replace a node spec.
    pub fn put_spec(&self, spec: NodeSpec) {
        lock(&self.specs).insert(spec.hostname.clone(), spec);
    }

    /// Modify a stored spec in place.
    pub fn update_spec<F>(&self, hostname: &HostName, update: F)
    where
        F: FnOnce(&mut NodeSpec),
    {
        if let Some(spec) = lock(&self.specs).get_mut(hostname) {
            update(spec);
        }
    }

    pub fn remove_spec(&self, hostname: &HostName) -> Option<NodeSpec> {
        lock(&self.specs).remove(hostname)
    }

    pub fn spec(&self, hostname: &HostName) -> Option<NodeSpec> {
        lock(&self.specs).get(hostname).cloned()
    }

    /// Fail the next `times` spec list fetches.
    pub fn fail_next_fetches(&self, times: u32) {
        self.failing_fetches.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` state or attribute updates.
    pub fn fail_next_updates(&self, times: u32) {
        self.failing_updates.store(times, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected(what: &str) -> RepositoryError {
        RepositoryError::Api {
            status: 503,
            message: format!("injected {what} failure"),
        }
    }
}

#[async_trait]
impl NodeRepository for MockNodeRepository {
    async fn get_node_specs(&self) -> Result<Vec<NodeSpec>, RepositoryError> {
        if Self::take_failure(&self.failing_fetches) {
            return Err(Self::injected("fetch"));
        }
        Ok(lock(&self.specs).values().cloned().collect())
    }

    async fn get_node_spec(&self, hostname: &HostName) -> Result<Option<NodeSpec>, RepositoryError> {
        Ok(self.spec(hostname))
    }

    async fn update_node_state(
        &self,
        hostname: &HostName,
        state: NodeState,
    ) -> Result<(), RepositoryError> {
        if Self::take_failure(&self.failing_updates) {
            return Err(Self::injected("state update"));
        }
        self.update_spec(hostname, |spec| spec.node_state = state);
        self.log.record(format!(
            "updateNodeState with HostName: {hostname}, state: {state}"
        ));
        Ok(())
    }

    async fn update_node_attributes(
        &self,
        hostname: &HostName,
        attributes: &NodeAttributes,
    ) -> Result<(), RepositoryError> {
        if Self::take_failure(&self.failing_updates) {
            return Err(Self::injected("attribute update"));
        }
        self.update_spec(hostname, |spec| {
            if attributes.current_restart_generation.is_some() {
                spec.current_restart_generation = attributes.current_restart_generation;
            }
        });
        let image = attributes
            .current_docker_image
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        self.log.record(format!(
            "updateNodeAttributes with HostName: {hostname}, restartGeneration: {:?}, dockerImage: {image}",
            attributes.current_restart_generation
        ));
        Ok(())
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolver that maps every hostname to one address.
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver {
    address: IpAddr,
}

impl StaticResolver {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, _hostname: &HostName) -> io::Result<IpAddr> {
        Ok(self.address)
    }
}
