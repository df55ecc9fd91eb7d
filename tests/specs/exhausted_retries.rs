//! Scenario 3 (spec.md §8): a job that never succeeds exhausts
//! `max_retry` and ends in DEAD with `attempt == max_retry`.

use crate::prelude::*;
use raftq_core::job::{JobId, JobStatus};
use std::time::Duration;

#[tokio::test]
async fn job_dies_after_exhausting_retries() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_node_config(dir.path(), "n1", 1);
    let node = start(config).await;
    let addr = node.local_addr();

    let job_id = JobId::new("j7");
    submit_until_accepted(&[addr], job_id.clone(), always_fails_payload(dir.path(), "j7"), Duration::from_secs(5)).await;

    let dead = wait_until(Duration::from_secs(10), || node.controller.dead_count() == 1).await;
    assert!(dead, "expected j7 to end up DEAD");

    let job = node.controller.job_snapshot(&job_id).expect("dead job should still be known");
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.attempt, 3);
    assert_eq!(node.controller.completed_count(), 0);

    lifecycle::shutdown(node).await;
}
