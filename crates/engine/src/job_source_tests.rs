use super::*;
use raftq_core::job::Job;
use std::time::Duration;

fn job(id: &str) -> Job {
    Job::new(JobId::new(id), serde_json::json!({}), Duration::from_secs(5), chrono::Utc::now())
}

#[tokio::test]
async fn local_job_source_round_trips_poll_through_the_channel() {
    let (poll_tx, mut poll_rx) = mpsc::channel(8);
    let (ack_tx, _ack_rx) = mpsc::channel(8);
    let source = LocalJobSource::new(poll_tx, ack_tx);

    let responder = tokio::spawn(async move {
        let req = poll_rx.recv().await.unwrap();
        assert_eq!(req.max, 3);
        let _ = req.reply.send(vec![job("a")]);
    });

    let jobs = source.poll(3).await.unwrap();
    assert_eq!(jobs.len(), 1);
    responder.await.unwrap();
}

#[tokio::test]
async fn local_job_source_poll_fails_once_controller_side_is_dropped() {
    let (poll_tx, poll_rx) = mpsc::channel(8);
    let (ack_tx, _ack_rx) = mpsc::channel(8);
    drop(poll_rx);
    let source = LocalJobSource::new(poll_tx, ack_tx);
    let err = source.poll(1).await.unwrap_err();
    assert!(matches!(err, JobSourceError::Closed));
}

#[tokio::test]
async fn local_job_source_heartbeat_is_a_no_op() {
    let (poll_tx, _poll_rx) = mpsc::channel(8);
    let (ack_tx, _ack_rx) = mpsc::channel(8);
    let source = LocalJobSource::new(poll_tx, ack_tx);
    let resp = source.heartbeat(NodeId::new("n1"), 2).await.unwrap();
    assert!(!resp.reregister);
}

struct FlakyClient {
    fail_until_call: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl JobSourceClient for FlakyClient {
    async fn poll(&self, _leader: &NodeId, _max: usize) -> Result<Vec<Job>, JobSourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_until_call.load(Ordering::SeqCst) {
            Err(JobSourceError::Closed)
        } else {
            Ok(vec![job("remote-job")])
        }
    }
    async fn acknowledge(&self, _leader: &NodeId, _job_id: JobId, _outcome: ExecutionOutcome) -> Result<(), JobSourceError> {
        Ok(())
    }
    async fn heartbeat(&self, _leader: &NodeId, _node_id: NodeId, _current_load: usize) -> Result<HeartbeatResponse, JobSourceError> {
        Ok(HeartbeatResponse::default())
    }
}

#[tokio::test]
async fn remote_job_source_retries_across_peers_before_succeeding() {
    let client = Arc::new(FlakyClient { fail_until_call: AtomicUsize::new(2), calls: AtomicUsize::new(0) });
    let source = RemoteJobSource::new(client, vec![NodeId::new("n1"), NodeId::new("n2"), NodeId::new("n3")]);
    let jobs = source.poll(5).await.unwrap();
    assert_eq!(jobs[0].id, JobId::new("remote-job"));
}

#[tokio::test]
async fn remote_job_source_fails_when_no_peers_are_configured() {
    let client = Arc::new(FlakyClient { fail_until_call: AtomicUsize::new(0), calls: AtomicUsize::new(0) });
    let source = RemoteJobSource::new(client, vec![]);
    let err = source.poll(1).await.unwrap_err();
    assert!(matches!(err, JobSourceError::NoReachableLeader(0)));
}
