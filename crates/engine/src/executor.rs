// SPDX-License-Identifier: MIT

//! Job payload execution.

use async_trait::async_trait;
use raftq_core::job::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Outcome of running a single job attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Success(Value),
    Failure(String),
    TimedOut,
}

/// Runs a job's payload. Implementations own whatever side effects the
/// payload describes; the pool only needs an outcome back, not how it was
/// produced.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}

/// A job's payload shaped as a subprocess invocation: `{"program": "...",
/// "args": [...]}`. Anything else fails fast with a descriptive error
/// rather than attempting to guess an interpretation.
#[derive(Debug, Deserialize)]
struct CommandPayload {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Default, non-test [`JobExecutor`]: runs a job's payload as a subprocess
/// via `tokio::process::Command` and captures its stdout. The `timeout`
/// passed to [`crate::pool::run`] governs cancellation; this executor only
/// needs to be cancel-safe at its single `.output()` await point, which
/// `tokio::time::timeout` already guarantees by dropping the future (and
/// with it the child process) on expiry.
pub struct CommandExecutor;

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let payload: CommandPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => return ExecutionOutcome::Failure(format!("payload is not a command invocation: {e}")),
        };

        match tokio::process::Command::new(&payload.program).args(&payload.args).output().await {
            Ok(output) if output.status.success() => {
                ExecutionOutcome::Success(Value::String(String::from_utf8_lossy(&output.stdout).into_owned()))
            }
            Ok(output) => ExecutionOutcome::Failure(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )),
            Err(e) => ExecutionOutcome::Failure(format!("failed to spawn {}: {e}", payload.program)),
        }
    }
}

/// Deterministic executor for tests: maps a job id to a canned outcome, or
/// falls back to a default for anything unlisted.
pub struct FakeExecutor {
    outcomes: parking_lot::Mutex<std::collections::HashMap<String, ExecutionOutcome>>,
    default: ExecutionOutcome,
    delay: Option<Duration>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(std::collections::HashMap::new()),
            default: ExecutionOutcome::Success(Value::Null),
            delay: None,
        }
    }

    pub fn with_default(mut self, outcome: ExecutionOutcome) -> Self {
        self.default = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_outcome(&self, job_id: impl Into<String>, outcome: ExecutionOutcome) {
        self.outcomes.lock().insert(job_id.into(), outcome);
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobExecutor for FakeExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcomes = self.outcomes.lock();
        outcomes.get(job.id.as_str()).cloned().unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
