use super::*;
use crate::metrics::{NoopMetrics, RecordingMetrics};
use async_trait::async_trait;
use raftq_core::clock::FakeClock;
use raftq_core::worker::NodeId;
use raftq_raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use raftq_raft::transport::{Transport, TransportError};
use raftq_raft::{MemLogStore, RaftConfig};
use serde_json::json;
use std::time::Instant;

struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn request_vote(&self, peer: &NodeId, _req: RequestVoteRequest) -> Result<RequestVoteResponse, TransportError> {
        Err(TransportError::Unreachable(peer.clone(), "no network in tests".into()))
    }
    async fn append_entries(&self, peer: &NodeId, _req: AppendEntriesRequest) -> Result<AppendEntriesResponse, TransportError> {
        Err(TransportError::Unreachable(peer.clone(), "no network in tests".into()))
    }
}

fn single_node_controller(wal: Wal, max_retry: u32) -> (Controller, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let controller = Controller::new(
        JobStateMachine::new(),
        wal,
        Consensus::SingleNode,
        clock.clone(),
        Arc::new(NoopMetrics),
        max_retry,
    );
    (controller, clock)
}

fn open_wal(dir: &tempfile::TempDir) -> Wal {
    Wal::open(&dir.path().join("events.wal"), 0).unwrap()
}

#[tokio::test]
async fn single_node_submit_dispatch_and_ack_completes_job() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _clock) = single_node_controller(open_wal(&dir), 3);

    controller.submit_job(JobId::new("j0"), json!({"x": 1}), Duration::from_secs(5)).await.unwrap();
    assert_eq!(controller.pending_count(), 1);

    let dispatched = controller.handle_poll(WorkerId::new("w1"), 1);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].id, JobId::new("j0"));
    assert_eq!(controller.in_flight_count(), 1);

    controller.handle_ack(JobId::new("j0"), ExecutionOutcome::Success(json!("ok"))).await.unwrap();
    assert_eq!(controller.completed_count(), 1);
    assert_eq!(controller.in_flight_count(), 0);
}

#[tokio::test]
async fn single_node_failure_retries_until_max_retry_then_dies() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _clock) = single_node_controller(open_wal(&dir), 1);

    controller.submit_job(JobId::new("j0"), json!({}), Duration::from_secs(5)).await.unwrap();

    controller.handle_poll(WorkerId::new("w1"), 1);
    controller.handle_ack(JobId::new("j0"), ExecutionOutcome::Failure("boom".into())).await.unwrap();
    assert_eq!(controller.pending_count(), 1, "first failure retries, attempt 0 < max_retry 1");
    assert_eq!(controller.dead_count(), 0);

    controller.handle_poll(WorkerId::new("w1"), 1);
    controller.handle_ack(JobId::new("j0"), ExecutionOutcome::Failure("boom again".into())).await.unwrap();
    assert_eq!(controller.dead_count(), 1, "second failure hits attempt 1 >= max_retry 1");
    assert_eq!(controller.pending_count(), 0);
}

#[tokio::test]
async fn single_node_timeout_sweep_requeues_expired_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, clock) = single_node_controller(open_wal(&dir), 3);

    controller.submit_job(JobId::new("j0"), json!({}), Duration::from_secs(5)).await.unwrap();
    controller.handle_poll(WorkerId::new("w1"), 1);
    assert_eq!(controller.in_flight_count(), 1);

    clock.advance(chrono::Duration::seconds(10));
    let processed = controller.run_timeout_sweep().await;
    assert_eq!(processed, 1);
    assert_eq!(controller.pending_count(), 1);
    assert_eq!(controller.in_flight_count(), 0);
}

#[tokio::test]
async fn wal_replay_reconstructs_state_and_skips_dispatch_and_timeout_events() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("events.wal");
    let now = chrono::Utc::now();

    {
        let mut wal = Wal::open(&wal_path, 0).unwrap();
        let job = Job::new(JobId::new("j0"), json!({}), Duration::from_secs(5), now);
        wal.append(WalEventType::Enqueue, JobId::new("j0"), now, Some(job)).unwrap();
        wal.append(WalEventType::Dispatch, JobId::new("j0"), now, None).unwrap();
        wal.append(WalEventType::Retry, JobId::new("j0"), now, None).unwrap();
        wal.flush().unwrap();
    }

    let mut replay_wal = Wal::open(&wal_path, 0).unwrap();
    let (controller, _clock) = single_node_controller(Wal::open(&wal_path, 0).unwrap(), 3);
    while let Some(entry) = replay_wal.next_unprocessed().unwrap() {
        controller.replay_wal_entry(entry);
    }

    assert_eq!(controller.pending_count(), 1, "retry puts the job back in pending after enqueue+dispatch+retry");
    assert_eq!(controller.in_flight_count(), 0);

    let job = controller.job_snapshot(&JobId::new("j0")).expect("job survives replay");
    assert_eq!(job.attempt, 1, "retry's attempt increment must survive replay even though dispatch never moved the job to in_flight");
}

#[tokio::test]
async fn replicated_mode_applies_command_once_committed() {
    let dir = tempfile::tempdir().unwrap();
    let wal = open_wal(&dir);
    let raft = Arc::new(RaftNode::new(
        RaftConfig::new(NodeId::new("n1"), vec![]),
        Box::new(MemLogStore::new()),
        Arc::new(NullTransport),
    ));
    raft.tick(Instant::now() + Duration::from_secs(10)).await;
    assert!(raft.is_leader());

    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let controller = Controller::new(
        JobStateMachine::new(),
        wal,
        Consensus::Replicated(raft.clone()),
        clock,
        Arc::new(RecordingMetrics::default()),
        3,
    );

    let pump = async {
        loop {
            raft.replicate_once().await;
            for entry in raft.drain_committed() {
                controller.apply_committed_entry(entry);
            }
            if controller.pending_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };

    let (submitted, ()) = tokio::join!(controller.submit_job(JobId::new("j0"), json!({}), Duration::from_secs(5)), pump);
    submitted.unwrap();
    assert_eq!(controller.pending_count(), 1);
}

#[test]
fn invariant_audit_reports_healthy_state_as_zero() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _clock) = single_node_controller(open_wal(&dir), 3);
    controller.run_invariant_audit();
}
