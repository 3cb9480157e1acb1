//! Convergence behaviour of a single node agent running on its own ticks.

mod common;

use std::time::Duration;

use common::*;
use nodeadm_id::ContainerName;
use nodeadm_node_admin::runtime::Container;
use nodeadm_node_admin::{NodeSpec, NodeState};
use nodeadm_reconcile::ConvergenceStatus;
use rstest::rstest;

fn probe_command() -> Vec<String> {
    ["/usr/bin/env", "test", "-x", "/opt/vespa/bin/vespa-nodectl"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[tokio::test]
async fn test_suspend_denial_is_retried() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();
    let host = hostname("host1");

    admin.refresh(vec![node_spec(NodeState::Active, "dockerImage")]).await;
    harness.log.assert_in_order("provisioned", &[RESUME]).await;

    harness.orchestrator.set_suspend_denied(&host, true);
    admin.refresh(vec![node_spec(NodeState::Dirty, "dockerImage")]).await;

    let denied = "suspend with HostName: host1: denied";
    harness
        .log
        .assert_in_order("suspend retried", &[denied, denied, denied])
        .await;
    assert_eq!(harness.log.count(STOP), 0);
    assert!(harness.runtime.container("container").is_some_and(|c| c.running));

    harness.orchestrator.set_suspend_denied(&host, false);
    harness
        .log
        .assert_in_order(
            "cleanup once granted",
            &[denied, "suspend with HostName: host1: granted", STOP, DELETE, READY],
        )
        .await;

    admin.deconstruct().await;
    assert_ordering_invariants(&harness.log.entries(), "host1", "container");
}

#[tokio::test]
async fn test_recovers_from_transient_runtime_failures() {
    let harness = Harness::new();
    harness.runtime.fail_next("createContainer", 2);
    harness.runtime.fail_next("executeInContainer", 1);
    let mut admin = harness.node_admin();

    admin.refresh(vec![node_spec(NodeState::Active, "dockerImage")]).await;

    let create = create_entry("dockerImage", "host1", "container");
    harness
        .log
        .assert_in_order("converges despite failures", &[create.as_str(), PROBE, RESUME])
        .await;

    let handle = admin.agent(&hostname("host1")).unwrap().clone();
    assert!(
        handle
            .wait_until(WAIT, |s| s.is_serving() && s.last_error.is_none())
            .await
    );
    assert_eq!(harness.log.count(&create), 1);

    admin.deconstruct().await;
}

#[tokio::test]
async fn test_waits_for_readiness_probe() {
    let harness = Harness::new();
    harness.runtime.set_exec_exit_code(probe_command(), 1);
    let mut admin = harness.node_admin();

    admin.refresh(vec![node_spec(NodeState::Active, "dockerImage")]).await;
    harness.log.assert_in_order("probing", &[PROBE, PROBE, PROBE]).await;
    assert_eq!(harness.log.count(RESUME), 0);

    harness.runtime.set_exec_exit_code(probe_command(), 0);
    harness.log.assert_in_order("resumed", &[PROBE, RESUME]).await;
    assert_eq!(harness.log.count_prefix("createContainerCommand"), 1);

    admin.deconstruct().await;
}

#[tokio::test]
async fn test_converged_node_is_left_alone() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();
    let spec = node_spec(NodeState::Active, "dockerImage");

    admin.refresh(vec![spec.clone()]).await;
    let handle = admin.agent(&hostname("host1")).unwrap().clone();
    assert!(
        handle
            .wait_until(WAIT, |s| s.status == ConvergenceStatus::Converged)
            .await
    );
    let calls = harness.log.len();
    let ticks = handle.snapshot().ticks;

    for _ in 0..5 {
        admin.refresh(vec![spec.clone()]).await;
    }
    assert!(handle.wait_until(WAIT, |s| s.ticks >= ticks + 5).await);

    assert_eq!(harness.log.len(), calls);
    admin.deconstruct().await;
}

#[tokio::test]
async fn test_restart_generation_bump() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();
    let spec = node_spec(NodeState::Active, "dockerImage").with_restart_generation(1, 1);

    admin.refresh(vec![spec.clone()]).await;
    harness.log.assert_in_order("provisioned", &[RESUME]).await;

    admin.refresh(vec![spec.with_restart_generation(2, 1)]).await;
    harness
        .log
        .assert_in_order(
            "services restarted",
            &[
                "executeInContainer with ContainerName: container, args: [/opt/vespa/bin/vespa-nodectl, restart]",
                "updateNodeAttributes with HostName: host1, restartGeneration: Some(2), dockerImage: dockerImage",
            ],
        )
        .await;

    admin.deconstruct().await;
    assert_eq!(harness.log.count_prefix("createContainerCommand"), 1);
    assert_eq!(
        harness
            .log
            .count("executeInContainer with ContainerName: container, args: [/opt/vespa/bin/vespa-nodectl, restart]"),
        1
    );
}

#[rstest]
#[case::failed(NodeState::Failed)]
#[case::parked(NodeState::Parked)]
#[case::provisioned(NodeState::Provisioned)]
#[case::ready(NodeState::Ready)]
#[tokio::test]
async fn test_terminal_states_do_nothing(#[case] state: NodeState) {
    let harness = Harness::new();
    harness.runtime.insert_container(Container {
        name: ContainerName::parse("container").unwrap(),
        hostname: Some(hostname("host1")),
        image: image("oldImage"),
        running: true,
        resources: Default::default(),
    });
    let mut admin = harness.node_admin();

    admin.refresh(vec![node_spec(state, "dockerImage")]).await;
    let handle = admin.agent(&hostname("host1")).unwrap().clone();
    assert!(handle.wait_until(WAIT, |s| s.ticks >= 5).await);

    admin.deconstruct().await;
    assert!(harness.log.is_empty(), "{:#?}", harness.log.entries());
    assert!(harness.runtime.container("container").is_some_and(|c| c.running));
}

#[tokio::test]
async fn test_report_failures_do_not_block_other_hosts() {
    let harness = Harness::new();
    harness.repository.fail_next_updates(1000);
    let mut admin = harness.node_admin();

    let other = NodeSpec::new(hostname("host2"), ContainerName::parse("other").unwrap(), NodeState::Active)
        .with_image(image("dockerImage"));
    admin
        .refresh(vec![node_spec(NodeState::Dirty, "dockerImage"), other])
        .await;

    let host2 = admin.agent(&hostname("host2")).unwrap().clone();
    assert!(host2.wait_until(WAIT, |s| s.resumed).await);

    let host1 = admin.agent(&hostname("host1")).unwrap().clone();
    assert!(host1.wait_until(WAIT, |s| s.last_error.is_some()).await);
    assert_eq!(harness.log.count(READY), 0);

    harness.repository.fail_next_updates(0);
    harness.log.assert_in_order("ready reported", &[READY]).await;

    admin.deconstruct().await;
    assert_eq!(harness.log.count(READY), 1);
}

#[tokio::test]
async fn test_removing_during_backoff_stops_cleanly() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();
    harness.orchestrator.set_deny_all(true);

    admin.refresh(vec![node_spec(NodeState::Active, "dockerImage")]).await;
    harness.log.assert_in_order("provisioned", &[RESUME]).await;
    admin.refresh(vec![node_spec(NodeState::Inactive, "dockerImage")]).await;
    harness
        .log
        .assert_in_order("denied", &["suspend with HostName: host1: denied"])
        .await;

    admin.refresh(Vec::new()).await;
    let calls = harness.log.len();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.log.len(), calls);
    assert!(harness.runtime.container("container").is_some_and(|c| c.running));
}
