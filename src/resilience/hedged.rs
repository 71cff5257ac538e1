//! Hedged requests.
//!
//! # Schedule
//! ```text
//! t = 0          attempt 0
//! t = delay      attempt 1   (unless a success was already observed)
//! t = k * delay  attempt k   (up to `concurrency` attempts)
//! ```
//!
//! # Design Decisions
//! - The first success wins; every other attempt is cancelled and aborted
//! - Failures wait for the remaining attempts (and the rest of the
//!   schedule); once every attempt is terminal the first fatal failure is
//!   returned, else the first recoverable one
//! - The schedule is fixed: a fast failure does not pull the next launch
//!   forward

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::HedgeConfig;
use crate::observability::metrics;
use crate::resilience::fanout::Race;
use crate::resilience::operation::Operation;
use crate::resilience::outcome::Outcome;
use crate::resilience::scatter_gather::GatherPolicy;

/// Launches redundant attempts on a delayed schedule to cut tail latency.
#[derive(Debug, Clone)]
pub struct HedgedExecutor {
    delay: Duration,
    concurrency: usize,
}

impl HedgedExecutor {
    /// `concurrency` is the total number of attempts, including the first.
    pub fn new(delay: Duration, concurrency: usize) -> Self {
        Self {
            delay,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &HedgeConfig) -> Self {
        Self::new(Duration::from_millis(config.delay_ms), config.concurrency)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn execute<O>(&self, op: Arc<O>, cancel: &CancellationToken) -> Outcome<O::Output, O::Error>
    where
        O: Operation + 'static,
    {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let mut race = Race::new(cancel, "hedged", GatherPolicy::AllTerminal);
        race.launch(&op);
        let mut next_launch = Instant::now() + self.delay;

        loop {
            let decided = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                Some(joined) = race.next() => race.settle(joined),
                _ = time::sleep_until(next_launch), if race.launched() < self.concurrency => {
                    race.launch(&op);
                    metrics::record_hedge_launched();
                    tracing::debug!(
                        attempt = race.launched() - 1,
                        in_flight = race.in_flight(),
                        "Launched hedged attempt"
                    );
                    next_launch += self.delay;
                    None
                }
            };

            if let Some(outcome) = decided {
                return outcome;
            }
            if race.in_flight() == 0 && race.launched() >= self.concurrency {
                return race.exhausted();
            }
        }
    }

    pub fn bind<O: Operation + 'static>(&self, op: O) -> Hedging<O> {
        Hedging {
            executor: self.clone(),
            op: Arc::new(op),
        }
    }
}

/// An operation that runs its inner operation through a [`HedgedExecutor`].
#[derive(Debug)]
pub struct Hedging<O> {
    executor: HedgedExecutor,
    op: Arc<O>,
}

impl<O> Clone for Hedging<O> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            op: Arc::clone(&self.op),
        }
    }
}

impl<O: Operation + 'static> Operation for Hedging<O> {
    type Output = O::Output;
    type Error = O::Error;

    fn attempt(
        &self,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Outcome<O::Output, O::Error>> + Send {
        async move { self.executor.execute(Arc::clone(&self.op), &cancel).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::fanout::test_support::{ms, Plan, Scripted, TestOutcome, HOUR};

    #[tokio::test(start_paused = true)]
    async fn test_all_succeed_leaves_nothing_running() {
        for n in [1, 2, 25, 50] {
            let scripted = Scripted::new();
            let op = scripted.op(|i| Plan::After(ms(20), TestOutcome::Success(i)));

            let outcome = HedgedExecutor::new(ms(5), n).execute(op, &CancellationToken::new()).await;
            assert!(outcome.is_success(), "n={} got {:?}", n, outcome);
            assert!(scripted.calls() <= n);
            scripted.assert_no_leaks().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_whichever_index_succeeds() {
        for winner in 0..4 {
            let scripted = Scripted::new();
            let op = scripted.op(move |i| {
                if i == winner {
                    Plan::After(ms(1), TestOutcome::Success(i))
                } else {
                    Plan::After(ms(1), TestOutcome::Recoverable(i))
                }
            });

            let outcome = HedgedExecutor::new(ms(10), 4).execute(op, &CancellationToken::new()).await;
            assert_eq!(outcome, Outcome::Success(winner));
            assert_eq!(scripted.calls(), winner + 1);
            scripted.assert_no_leaks().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedge_beats_slow_primary() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| match i {
            0 => Plan::After(HOUR, TestOutcome::Success(0)),
            _ => Plan::After(ms(10), TestOutcome::Success(i)),
        });

        let start = Instant::now();
        let outcome = HedgedExecutor::new(ms(50), 2).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success(1));
        assert!(start.elapsed() < ms(100), "{:?}", start.elapsed());
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_for_later_success() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| match i {
            0 => Plan::After(ms(1), TestOutcome::Recoverable(0)),
            _ => Plan::After(ms(5), TestOutcome::Success(i)),
        });

        let outcome = HedgedExecutor::new(ms(10), 3).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fail_returns_first_failure() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| Plan::After(ms(5), TestOutcome::Recoverable(i)));

        let outcome = HedgedExecutor::new(ms(10), 3).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Recoverable(0));
        assert_eq!(scripted.calls(), 3);
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_does_not_preempt_later_success() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| match i {
            0 => Plan::After(ms(1), TestOutcome::Fatal(0)),
            _ => Plan::After(ms(5), TestOutcome::Success(i)),
        });

        let outcome = HedgedExecutor::new(ms(10), 3).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success(1));
        assert_eq!(scripted.calls(), 2);
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_reported_ahead_of_recoverable() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| match i {
            1 => Plan::After(ms(1), TestOutcome::Fatal(1)),
            _ => Plan::After(ms(1), TestOutcome::Recoverable(i)),
        });

        let outcome = HedgedExecutor::new(ms(10), 3).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Fatal(1));
        assert_eq!(scripted.calls(), 3);
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_further_launches() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| Plan::After(ms(15), TestOutcome::Success(i)));

        let outcome = HedgedExecutor::new(ms(10), 10).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success(0));
        assert_eq!(scripted.calls(), 2);

        time::sleep(ms(200)).await;
        assert_eq!(scripted.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| Plan::After(HOUR, TestOutcome::Success(i)));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            time::sleep(ms(25)).await;
            canceller.cancel();
        });

        let outcome = HedgedExecutor::new(ms(10), 5).execute(op, &cancel).await;
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(scripted.calls(), 3);
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_makes_no_attempt() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| Plan::After(ms(1), TestOutcome::Success(i)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = HedgedExecutor::new(ms(10), 3).execute(op, &cancel).await;
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(scripted.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loser_ignoring_cancellation_is_aborted() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| match i {
            0 => Plan::Stubborn(HOUR, TestOutcome::Success(0)),
            _ => Plan::After(ms(5), TestOutcome::Success(i)),
        });

        let start = Instant::now();
        let outcome = HedgedExecutor::new(ms(10), 2).execute(op, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success(1));
        assert!(start.elapsed() < ms(50));
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_execute_cancels_attempts() {
        let scripted = Scripted::new();
        let op = scripted.op(|i| Plan::Stubborn(HOUR, TestOutcome::Success(i)));
        let executor = HedgedExecutor::new(ms(10), 3);

        let result = time::timeout(ms(25), executor.execute(op, &CancellationToken::new())).await;
        assert!(result.is_err());
        assert_eq!(scripted.calls(), 3);
        scripted.assert_no_leaks().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_hedging_is_an_operation() {
        let scripted = Scripted::new();
        let calls = scripted.calls.clone();
        let bound = HedgedExecutor::new(ms(10), 2).bind(move |_cancel: CancellationToken| {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { TestOutcome::Success(n) }
        });

        assert_eq!(bound.attempt(CancellationToken::new()).await, Outcome::Success(0));
        assert_eq!(bound.clone().attempt(CancellationToken::new()).await, Outcome::Success(1));
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        assert_eq!(HedgedExecutor::new(ms(1), 0).concurrency(), 1);
    }
}
