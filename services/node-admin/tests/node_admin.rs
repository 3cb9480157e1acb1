//! Agent population management.

mod common;

use std::time::Duration;

use common::*;
use nodeadm_id::ContainerName;
use nodeadm_node_admin::{NodeSpec, NodeState};

fn spec_for(host: &str) -> NodeSpec {
    NodeSpec::new(hostname(host), ContainerName::parse(host).unwrap(), NodeState::Active)
        .with_image(image("dockerImage"))
}

fn resumed(host: &str) -> String {
    format!("executeInContainer with ContainerName: {host}, args: [/opt/vespa/bin/vespa-nodectl, resume]")
}

#[tokio::test]
async fn test_removed_host_gets_no_more_calls() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();

    admin.refresh(vec![spec_for("host1"), spec_for("host2")]).await;
    for host in ["host1", "host2"] {
        harness
            .log
            .assert_in_order("host converges", &[resumed(host).as_str()])
            .await;
    }

    admin.refresh(vec![spec_for("host1")]).await;
    assert_eq!(admin.get_list_of_hosts(), vec![hostname("host1")]);
    assert!(admin.agent(&hostname("host2")).is_none());

    let host2_calls = count_mentioning(&harness, "host2");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_mentioning(&harness, "host2"), host2_calls);

    // host1 keeps its container and agent
    assert!(harness.runtime.container("host1").is_some_and(|c| c.running));

    admin.deconstruct().await;
}

fn count_mentioning(harness: &Harness, host: &str) -> usize {
    harness
        .log
        .entries()
        .iter()
        .filter(|e| e.contains(host))
        .count()
}

#[tokio::test]
async fn test_re_added_host_gets_fresh_agent() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();

    admin.refresh(vec![spec_for("host1")]).await;
    harness
        .log
        .assert_in_order("first convergence", &[resumed("host1").as_str()])
        .await;

    admin.refresh(Vec::new()).await;
    assert!(admin.get_list_of_hosts().is_empty());

    // The container survived; a new agent adopts it without recreating it.
    admin.refresh(vec![spec_for("host1")]).await;
    let handle = admin.agent(&hostname("host1")).unwrap().clone();
    assert!(handle.wait_until(WAIT, |s| s.is_serving()).await);
    assert_eq!(harness.log.count_prefix("createContainerCommand"), 1);

    admin.deconstruct().await;
}

#[tokio::test]
async fn test_deconstruct_stops_all_calls() {
    let harness = Harness::new();
    let probe = vec![
        "/usr/bin/env".to_string(),
        "test".to_string(),
        "-x".to_string(),
        "/opt/vespa/bin/vespa-nodectl".to_string(),
    ];
    // Keep agents busy probing on every tick.
    harness.runtime.set_exec_exit_code(probe, 1);
    let mut admin = harness.node_admin();

    admin
        .refresh(vec![spec_for("host1"), spec_for("host2"), spec_for("host3")])
        .await;
    for host in ["host1", "host2", "host3"] {
        let handle = admin.agent(&hostname(host)).unwrap().clone();
        assert!(handle.wait_until(WAIT, |s| s.ticks >= 3).await);
    }

    admin.deconstruct().await;
    assert!(admin.get_list_of_hosts().is_empty());

    let calls = harness.log.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.log.len(), calls);
}

#[tokio::test]
async fn test_snapshots_cover_every_agent() {
    let harness = Harness::new();
    let mut admin = harness.node_admin();

    admin
        .refresh(vec![spec_for("host2"), spec_for("host1").with_state(NodeState::Parked)])
        .await;

    let handle = admin.agent(&hostname("host2")).unwrap().clone();
    assert!(handle.wait_until(WAIT, |s| s.is_serving()).await);

    let snapshots = admin.snapshots();
    let hosts: Vec<&str> = snapshots.iter().map(|s| s.hostname.as_str()).collect();
    assert_eq!(hosts, vec!["host1", "host2"]);
    assert_eq!(snapshots[0].node_state, NodeState::Parked);
    assert!(snapshots[1].resumed);

    let json = serde_json::to_value(&snapshots).unwrap();
    assert_eq!(json[1]["status"], "converged");
    assert_eq!(json[1]["container"], "running");

    admin.deconstruct().await;
}
