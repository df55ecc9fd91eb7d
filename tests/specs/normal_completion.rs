//! Scenario 1 (spec.md §8): normal completion. 4 workers, 10 trivial jobs,
//! all reach COMPLETED with nothing left pending, in-flight, or dead.

use crate::prelude::*;
use raftq_core::job::JobId;
use std::time::Duration;

#[tokio::test]
async fn all_jobs_complete_with_no_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_node_config(dir.path(), "n1", 4);
    let node = start(config).await;
    let addr = node.local_addr();

    for i in 0..10 {
        submit_until_accepted(&[addr], JobId::new(format!("j{i}")), ok_payload(), Duration::from_secs(5)).await;
    }

    let completed = wait_until(Duration::from_secs(10), || node.controller.completed_count() == 10).await;
    assert!(completed, "expected all 10 jobs to complete, got {}", node.controller.completed_count());

    assert_eq!(node.controller.pending_count(), 0);
    assert_eq!(node.controller.in_flight_count(), 0);
    assert_eq!(node.controller.dead_count(), 0);

    lifecycle::shutdown(node).await;
}
