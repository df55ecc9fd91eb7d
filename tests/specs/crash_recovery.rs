//! Scenario 4 (spec.md §8): crash with hot state, restart, and recover.
//! The local worker pool is disabled so dispatched jobs stay IN_FLIGHT
//! indefinitely — standing in for "the process died before the worker
//! acknowledged" — then the node is dropped without a graceful shutdown
//! and restarted from the same state directory.

use crate::prelude::*;
use raftq_core::job::JobId;
use std::time::Duration;

#[tokio::test]
async fn restart_recovers_pending_and_requeues_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_node_config(dir.path(), "n1", 0);
    let node = start(config.clone()).await;
    let addr = node.local_addr();

    for i in 0..20 {
        submit_until_accepted(&[addr], JobId::new(format!("j{i}")), ok_payload(), Duration::from_secs(5)).await;
    }
    // Dispatch 5 of them to a worker that never acknowledges — they land
    // and stay IN_FLIGHT, exactly the state a crash mid-execution leaves.
    let response = call(addr, Request::PollJobs { node_id: "w1".into(), max: 5 }).await;
    let dispatched = match response {
        Response::Jobs(jobs) => jobs.len(),
        other => panic!("expected Jobs, got {other:?}"),
    };
    assert_eq!(dispatched, 5);

    // Let at least one snapshot land (snapshot_interval is 200ms in
    // single_node_config) before the crash, so recovery exercises both
    // the snapshot load and the WAL replay tail.
    wait_until(Duration::from_secs(2), || config.snapshot_path.exists()).await;

    assert_eq!(node.controller.pending_count(), 15);
    assert_eq!(node.controller.in_flight_count(), 5);

    // Crash: no shutdown() call, so nothing further is flushed or saved
    // beyond what already hit disk. Dropping the JoinSet aborts its tasks
    // asynchronously, so give the old listener socket a moment to actually
    // release the port before rebinding it.
    drop(node);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let node = start(config).await;
    let recovery_time = started.elapsed();
    assert!(recovery_time < Duration::from_secs(3), "recovery took {recovery_time:?}");

    assert_eq!(node.controller.pending_count(), 20, "all 20 jobs should be pending again after recovery");
    assert_eq!(node.controller.in_flight_count(), 0, "no job should still look in-flight after a crash recovery");
    assert_eq!(node.controller.completed_count(), 0);
    assert_eq!(node.controller.dead_count(), 0);

    lifecycle::shutdown(node).await;
}
