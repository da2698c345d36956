//! Coordinator execution: retry, resume and cancellation.
//!
//! A coordinator's `run` drives its phase state machine once. The runner
//! re-runs it on transient failure with capped, jittered backoff; any
//! non-retryable error (or retry exhaustion) completes with the error and
//! leaves the persisted document intact for a later resume.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use shaledb_shard::error::ShardError;

/// A resumable DDL coordinator.
#[async_trait]
pub trait Coordinator: Send {
    /// Human-readable coordinator type for logs.
    fn label(&self) -> &'static str;

    /// True once any phase beyond the initial one is durably recorded: a
    /// resumed coordinator must not silently abandon work.
    fn must_always_make_progress(&self) -> bool;

    /// Drives the state machine from the last completed phase to the end.
    async fn run(&mut self) -> Result<(), ShardError>;
}

/// Retry behavior for transient coordinator failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts before giving up for this invocation.
    pub max_attempts: u32,
    /// Backoff for the first retry.
    pub base_delay: Duration,
    /// Upper bound for the backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_cap = (exp.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        exp + Duration::from_millis(jitter)
    }
}

/// Drives coordinators to completion with retry and cancellation.
pub struct CoordinatorRunner {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl CoordinatorRunner {
    /// Creates a runner with the given policy and cancellation token.
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        CoordinatorRunner { policy, cancel }
    }

    /// Runs the coordinator until it completes, fails non-retryably, runs
    /// out of attempts, or is cancelled (stepdown). In every failure case
    /// the coordinator's document is left in place for the next resume.
    pub async fn drive<C: Coordinator>(&self, coordinator: &mut C) -> Result<(), ShardError> {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ShardError::Interrupted);
            }
            match coordinator.run().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    attempt += 1;
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        coordinator = coordinator.label(),
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient coordinator failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(ShardError::Interrupted),
                    }
                }
                Err(e) => {
                    tracing::error!(
                        coordinator = coordinator.label(),
                        must_resume = coordinator.must_always_make_progress(),
                        error = %e,
                        "coordinator failed; document retained for resume"
                    );
                    return Err(e);
                }
            }
        }
    }
}
