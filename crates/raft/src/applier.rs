// SPDX-License-Identifier: MIT

//! Drains committed log entries from a [`RaftNode`] and applies them, in
//! strict index order, through a caller-supplied function. The daemon
//! wires `apply` to the job state machine's command-replay path, which is
//! already idempotent (spec §4.3) — safe to call again if the applier
//! crashes mid-batch and replays from `last_applied`.

use crate::log::LogEntry;
use crate::node::RaftNode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Polls `node` for newly committed entries and invokes `apply` on each, in
/// order. Runs until the node is dropped (the `Arc` has no other owners) or
/// `shutdown` fires. `apply` must be idempotent: a crash between applying
/// an entry and the applier loop's next iteration is indistinguishable
/// from the entry never having been applied.
pub async fn run<F>(node: Arc<RaftNode>, poll_interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>, mut apply: F)
where
    F: FnMut(LogEntry) + Send,
{
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for entry in node.drain_committed() {
                    apply(entry);
                }
            }
            _ = &mut shutdown => {
                for entry in node.drain_committed() {
                    apply(entry);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "applier_tests.rs"]
mod tests;
