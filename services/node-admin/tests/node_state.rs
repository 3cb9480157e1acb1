//! Node state transitions of one host, driven end to end through the
//! updater's poll loop.

mod common;

use common::*;
use nodeadm_node_admin::NodeState;

#[tokio::test]
async fn test_initial_provisioning_order() {
    let harness = Harness::new();
    harness.repository.put_spec(node_spec(NodeState::Active, "dockerImage"));
    let mut updater = harness.start_updater();

    let create = create_entry("dockerImage", "host1", "container");
    harness
        .log
        .assert_in_order("initial provisioning", &[create.as_str(), PROBE, RESUME])
        .await;

    let entries = harness.log.entries();
    assert_eq!(
        entries[..4],
        [
            create.clone(),
            "startContainer with ContainerName: container".to_string(),
            PROBE.to_string(),
            RESUME.to_string(),
        ]
    );

    updater.deconstruct().await;
}

#[tokio::test]
async fn test_active_to_dirty_reports_ready() {
    let harness = Harness::new();
    harness.repository.put_spec(node_spec(NodeState::Active, "dockerImage"));
    let mut updater = harness.start_updater();

    let create = create_entry("dockerImage", "host1", "container");
    harness
        .log
        .assert_in_order("initial provisioning", &[create.as_str(), PROBE, RESUME])
        .await;

    harness
        .repository
        .update_spec(&hostname("host1"), |spec| spec.node_state = NodeState::Dirty);

    harness
        .log
        .assert_in_order(
            "cleanup of dirty node",
            &[RESUME, "suspend with HostName: host1: granted", STOP, DELETE, READY],
        )
        .await;

    updater.deconstruct().await;

    assert_eq!(harness.log.count(READY), 1);
    assert!(harness.runtime.container("container").is_none());
    assert_eq!(
        harness.repository.spec(&hostname("host1")).map(|s| s.node_state),
        Some(NodeState::Ready)
    );
    assert_ordering_invariants(&harness.log.entries(), "host1", "container");
}

#[tokio::test]
async fn test_inactive_then_active_with_new_image() {
    let harness = Harness::new();
    harness.repository.put_spec(node_spec(NodeState::Active, "dockerImage"));
    let mut updater = harness.start_updater();

    let create = create_entry("dockerImage", "host1", "container");
    harness
        .log
        .assert_in_order("initial provisioning", &[create.as_str(), PROBE, RESUME])
        .await;

    harness.repository.update_spec(&hostname("host1"), |spec| {
        spec.node_state = NodeState::Inactive;
        spec.wanted_docker_image = Some(image("newDockerImage"));
    });
    harness
        .log
        .assert_in_order("removal of inactive node", &[RESUME, STOP, DELETE])
        .await;

    harness
        .repository
        .update_spec(&hostname("host1"), |spec| spec.node_state = NodeState::Active);

    let recreate = create_entry("newDockerImage", "host1", "container");
    harness
        .log
        .assert_in_order(
            "re-provisioning with new image",
            &[DELETE, recreate.as_str(), PROBE, RESUME],
        )
        .await;

    updater.deconstruct().await;

    assert_eq!(harness.log.count(READY), 0);
    assert_eq!(harness.log.count(DELETE), 1);
    assert_eq!(
        harness.runtime.container("container").map(|c| c.image),
        Some(image("newDockerImage"))
    );
    assert_ordering_invariants(&harness.log.entries(), "host1", "container");
}
