use super::*;
use crate::executor::{ExecutionOutcome, FakeExecutor};
use crate::job_source::{LocalAckMessage, LocalJobSource, LocalPollRequest};
use raftq_core::job::{Job, JobId};
use tokio::sync::{mpsc, watch};

fn job(id: &str) -> Job {
    Job::new(JobId::new(id), serde_json::json!({}), Duration::from_secs(5), chrono::Utc::now())
}

/// Answers the first poll with `first`, every subsequent poll with nothing.
/// Runs until its sender side closes (the pool shutting down and dropping
/// its `LocalJobSource`), so it never leaves a poll request unanswered.
fn spawn_responder(mut poll_rx: mpsc::Receiver<LocalPollRequest>, first: Vec<Job>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut first = Some(first);
        while let Some(req) = poll_rx.recv().await {
            let _ = req.reply.send(first.take().unwrap_or_default());
        }
    })
}

#[tokio::test]
async fn dispatches_polled_jobs_and_reports_their_outcome() {
    let (poll_tx, poll_rx) = mpsc::channel::<LocalPollRequest>(8);
    let (ack_tx, mut ack_rx) = mpsc::channel::<LocalAckMessage>(8);
    let source = Arc::new(LocalJobSource::new(poll_tx, ack_tx));
    let executor = Arc::new(FakeExecutor::new());
    executor.set_outcome("a", ExecutionOutcome::Success(serde_json::json!({"done": true})));

    let responder = spawn_responder(poll_rx, vec![job("a")]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = tokio::spawn(run(
        executor,
        source,
        WorkerPoolConfig { worker_count: 2, task_timeout: Duration::from_secs(1), poll_interval: Duration::from_millis(5) },
        shutdown_rx,
    ));

    let ack = ack_rx.recv().await.unwrap();
    assert_eq!(ack.job_id, JobId::new("a"));
    assert!(matches!(ack.outcome, ExecutionOutcome::Success(_)));

    let _ = shutdown_tx.send(true);
    pool.await.unwrap();
    responder.await.unwrap();
}

#[tokio::test]
async fn a_timed_out_attempt_is_reported_as_timed_out() {
    let (poll_tx, poll_rx) = mpsc::channel::<LocalPollRequest>(8);
    let (ack_tx, mut ack_rx) = mpsc::channel::<LocalAckMessage>(8);
    let source = Arc::new(LocalJobSource::new(poll_tx, ack_tx));
    let executor = Arc::new(FakeExecutor::new().with_delay(Duration::from_millis(200)));

    let responder = spawn_responder(poll_rx, vec![job("slow")]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = tokio::spawn(run(
        executor,
        source,
        WorkerPoolConfig { worker_count: 1, task_timeout: Duration::from_millis(10), poll_interval: Duration::from_millis(5) },
        shutdown_rx,
    ));

    let ack = ack_rx.recv().await.unwrap();
    assert!(matches!(ack.outcome, ExecutionOutcome::TimedOut));

    let _ = shutdown_tx.send(true);
    pool.await.unwrap();
    responder.await.unwrap();
}
