//! Scenario 2 (spec.md §8): a job fails its first two attempts and
//! succeeds on the third. Expected: `attempt == 2` at COMPLETED (the
//! final successful attempt is the third dispatch, i.e. two RETRYs
//! happened first).

use crate::prelude::*;
use raftq_core::job::{JobId, JobStatus};
use std::time::Duration;

#[tokio::test]
async fn job_completes_after_two_retries() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_node_config(dir.path(), "n1", 1);
    let node = start(config).await;
    let addr = node.local_addr();

    let job_id = JobId::new("j0");
    submit_until_accepted(&[addr], job_id.clone(), flaky_payload(dir.path(), "j0", 2), Duration::from_secs(5)).await;

    let done = wait_until(Duration::from_secs(10), || node.controller.completed_count() == 1).await;
    assert!(done, "expected j0 to complete after retries");

    let job = node.controller.job_snapshot(&job_id).expect("job should still be known after completion");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt, 2, "two failed attempts should precede the successful third");

    lifecycle::shutdown(node).await;
}
