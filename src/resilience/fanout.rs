//! Race coordination for fan-out executors.
//!
//! # Responsibilities
//! - Spawn redundant attempts under one child cancellation scope
//! - Fold attempt outcomes into a single decision: a success wins; a
//!   failure is held until no attempt remains that could still succeed,
//!   with a fatal failure reported ahead of a recoverable one
//! - Cancel and abort losers as soon as a decision is made (including when
//!   the caller drops the executing future)

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::operation::Operation;
use crate::resilience::outcome::Outcome;
use crate::resilience::scatter_gather::GatherPolicy;

pub(crate) struct Race<T: Send + 'static, E: Send + 'static> {
    strategy: &'static str,
    policy: GatherPolicy,
    scope: CancellationToken,
    attempts: JoinSet<Outcome<T, E>>,
    launched: usize,
    failure: Option<Outcome<T, E>>,
}

impl<T, E> Race<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(parent: &CancellationToken, strategy: &'static str, policy: GatherPolicy) -> Self {
        Self {
            strategy,
            policy,
            scope: parent.child_token(),
            attempts: JoinSet::new(),
            launched: 0,
            failure: None,
        }
    }

    pub(crate) fn launch<O>(&mut self, op: &Arc<O>)
    where
        O: Operation<Output = T, Error = E> + 'static,
    {
        let op = Arc::clone(op);
        let scope = self.scope.clone();
        self.attempts.spawn(async move { op.attempt(scope).await });
        self.launched += 1;
    }

    pub(crate) fn launched(&self) -> usize {
        self.launched
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.attempts.len()
    }

    /// Wait for the next attempt to finish. `None` when nothing is in flight.
    pub(crate) async fn next(&mut self) -> Option<Result<Outcome<T, E>, JoinError>> {
        self.attempts.join_next().await
    }

    /// Fold one finished attempt. Returns the overall outcome once decided.
    pub(crate) fn settle(&mut self, joined: Result<Outcome<T, E>, JoinError>) -> Option<Outcome<T, E>> {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Outcome::Cancelled,
        };
        metrics::record_attempt(self.strategy, outcome.verdict());

        match outcome {
            Outcome::Success(_) => Some(outcome),
            Outcome::Recoverable(_) | Outcome::Fatal(_) if self.policy == GatherPolicy::FirstTerminal => {
                Some(outcome)
            }
            Outcome::Recoverable(_) | Outcome::Fatal(_) => {
                tracing::debug!(
                    strategy = self.strategy,
                    verdict = ?outcome.verdict(),
                    in_flight = self.attempts.len(),
                    "Attempt failed, waiting for the others"
                );
                if matches!(
                    (&self.failure, &outcome),
                    (None, _) | (Some(Outcome::Recoverable(_)), Outcome::Fatal(_))
                ) {
                    self.failure = Some(outcome);
                }
                None
            }
            // Sibling attempts only observe cancellation once a decision is
            // made, so this is never a decision in itself.
            Outcome::Cancelled => None,
        }
    }

    /// Overall outcome once every attempt is terminal without a success:
    /// the first fatal failure, else the first recoverable one.
    pub(crate) fn exhausted(&mut self) -> Outcome<T, E> {
        self.failure.take().unwrap_or(Outcome::Cancelled)
    }
}

impl<T: Send + 'static, E: Send + 'static> Drop for Race<T, E> {
    fn drop(&mut self) {
        self.scope.cancel();
        self.attempts.abort_all();
    }
}
