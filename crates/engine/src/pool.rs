// SPDX-License-Identifier: MIT

//! The Worker Pool: a bounded set of execution units pulling tasks through
//! a [`JobSource`] and reporting results back through it (spec §4.6).

use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::job_source::JobSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub task_timeout: Duration,
    pub poll_interval: Duration,
}

/// Drives the pool's poll/execute/acknowledge cycle until `shutdown`
/// fires. Graceful shutdown stops polling for new work immediately but
/// lets in-flight attempts drain up to `task_timeout` before returning.
pub async fn run<E, S>(
    executor: Arc<E>,
    source: Arc<S>,
    config: WorkerPoolConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    E: JobExecutor + 'static,
    S: JobSource + 'static,
{
    let semaphore = Arc::new(Semaphore::new(config.worker_count));
    let mut in_flight = JoinSet::new();
    let mut interval = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    continue;
                }
                let available = semaphore.available_permits();
                if available == 0 {
                    continue;
                }
                let jobs = match source.poll(available).await {
                    Ok(jobs) => jobs,
                    Err(_) => continue,
                };
                for job in jobs {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else { break };
                    let executor = executor.clone();
                    let source = source.clone();
                    let task_timeout = config.task_timeout;
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let outcome = match tokio::time::timeout(task_timeout, executor.execute(&job)).await {
                            Ok(outcome) => outcome,
                            Err(_) => ExecutionOutcome::TimedOut,
                        };
                        let _ = source.acknowledge(job.id.clone(), outcome).await;
                    });
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    while in_flight.join_next().await.is_some() {}
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
