//! Scenario 5 (spec.md §8): three-node cluster, kill the leader mid-flight,
//! a new leader takes over and no acknowledged job is lost.

use crate::prelude::*;
use raftq_core::job::JobId;
use std::time::Duration;

/// Finds the current leader by submitting a fresh, throwaway probe job to
/// each node in turn: only the leader accepts it, everyone else redirects.
async fn find_leader(nodes: &[(raftq_core::NodeId, std::net::SocketAddr)]) -> Option<std::net::SocketAddr> {
    for (_, addr) in nodes {
        let probe_id = JobId::new(format!("__probe_{}__", addr.port()));
        let response = call(
            *addr,
            Request::SubmitJob { job_id: probe_id, payload: serde_json::json!({}), timeout: Duration::from_secs(5) },
        )
        .await;
        match response {
            Response::JobSubmitted { .. } => return Some(*addr),
            Response::NotLeader { .. } => continue,
            other => panic!("unexpected response probing for leader: {other:?}"),
        }
    }
    None
}

#[tokio::test]
async fn a_new_leader_takes_over_after_the_old_one_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let configs = cluster_configs(dir.path(), &["n1", "n2", "n3"]);
    let node_addrs: Vec<(raftq_core::NodeId, std::net::SocketAddr)> = configs
        .iter()
        .map(|c| (c.node_id.clone(), c.rpc_bind.parse().unwrap()))
        .collect();

    let mut nodes: Vec<Option<RunningNode>> = Vec::new();
    for config in configs {
        nodes.push(Some(start(config).await));
    }

    let addrs: Vec<std::net::SocketAddr> = node_addrs.iter().map(|(_, a)| *a).collect();

    let leader_elected = wait_until(Duration::from_secs(5), || {
        nodes.iter().flatten().any(|n| n.controller.is_leader())
    })
    .await;
    assert!(leader_elected, "a leader should be elected within a few election timeouts");

    for i in 0..25 {
        submit_until_accepted(&addrs, JobId::new(format!("j{i}")), ok_payload(), Duration::from_secs(5)).await;
    }

    let leader_addr = find_leader(&node_addrs).await.expect("a leader should be reachable");
    let leader_index = node_addrs.iter().position(|(_, a)| *a == leader_addr).unwrap();

    // Kill the leader: drop its RunningNode, leaving its peers running.
    nodes[leader_index] = None;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let remaining_addrs: Vec<std::net::SocketAddr> =
        addrs.iter().enumerate().filter(|(i, _)| *i != leader_index).map(|(_, a)| *a).collect();

    let new_leader_elected = wait_until(Duration::from_secs(2), || {
        nodes.iter().flatten().any(|n| n.controller.is_leader())
    })
    .await;
    assert!(new_leader_elected, "a new leader should be elected within 2x the election timeout base");

    for i in 25..50 {
        submit_until_accepted(&remaining_addrs, JobId::new(format!("j{i}")), ok_payload(), Duration::from_secs(5)).await;
    }

    let total_known: usize = nodes
        .iter()
        .flatten()
        .map(|n| n.controller.pending_count() + n.controller.in_flight_count() + n.controller.completed_count())
        .max()
        .unwrap_or(0);
    assert!(total_known >= 50, "no submission acknowledged before the kill should be lost, saw {total_known}");

    for node in nodes.into_iter().flatten() {
        lifecycle::shutdown(node).await;
    }
}
