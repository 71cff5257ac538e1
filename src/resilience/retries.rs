//! Retry logic.
//!
//! # Responsibilities
//! - Re-run an idempotent operation after recoverable failures
//! - Wait between attempts according to a [`BackoffStrategy`]
//! - Stop immediately on success, fatal failure or cancellation
//!
//! # Design Decisions
//! - Attempts are strictly sequential
//! - Backoff sleeps are interrupted by the caller's cancellation scope
//! - After the last attempt the last outcome is returned unchanged

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{Backoff, BackoffStrategy};
use crate::resilience::operation::Operation;
use crate::resilience::outcome::Outcome;

/// Sequential retry executor.
#[derive(Debug, Clone)]
pub struct RetryExecutor<S = Backoff> {
    max_attempts: u32,
    strategy: S,
}

impl RetryExecutor<Backoff> {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff.to_backoff())
    }
}

impl<S: BackoffStrategy> RetryExecutor<S> {
    /// `max_attempts` counts the first attempt; zero is treated as one.
    pub fn new(max_attempts: u32, strategy: S) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails fatally, is cancelled or runs out of
    /// attempts.
    pub async fn execute<O: Operation>(
        &self,
        op: &O,
        cancel: &CancellationToken,
    ) -> Outcome<O::Output, O::Error> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let outcome = op.attempt(cancel.clone()).await;
            metrics::record_attempt("retry", outcome.verdict());

            match outcome {
                Outcome::Recoverable(_) if attempt + 1 < self.max_attempts => {
                    let delay = self.strategy.backoff(attempt);
                    tracing::debug!(attempt, delay = ?delay, "Retrying after recoverable failure");
                    metrics::record_retry();

                    tokio::select! {
                        _ = cancel.cancelled() => return Outcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Outcome::Recoverable(e) => {
                    tracing::debug!(attempts = self.max_attempts, "Retry attempts exhausted");
                    return Outcome::Recoverable(e);
                }
                other => return other,
            }
        }
    }

    /// Wrap `op` so the whole retry loop is itself an [`Operation`].
    pub fn bind<O: Operation>(&self, op: O) -> Retrying<O, S>
    where
        S: Clone,
    {
        Retrying {
            executor: self.clone(),
            op,
        }
    }
}

/// An operation that runs its inner operation through a [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct Retrying<O, S = Backoff> {
    executor: RetryExecutor<S>,
    op: O,
}

impl<O, S> Operation for Retrying<O, S>
where
    O: Operation,
    S: BackoffStrategy,
{
    type Output = O::Output;
    type Error = O::Error;

    fn attempt(
        &self,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Outcome<O::Output, O::Error>> + Send {
        async move { self.executor.execute(&self.op, &cancel).await }
    }
}
