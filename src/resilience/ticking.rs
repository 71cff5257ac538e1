//! Polling circuit breaker.
//!
//! A background task re-evaluates the state once per tick instead of on
//! admission. Decisions can lag by up to one tick.
//!
//! # State Transitions (per tick)
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: always, after one tick
//! Half-Open → Closed: no failures seen since becoming half-open
//! Half-Open → Open: otherwise
//! ```
//!
//! The ticker task runs until [`TickingBreaker::stop`] (idempotent) or drop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::{guard, Admission, Breaker, BreakerSnapshot, BreakerState};
use crate::resilience::operation::Operation;
use crate::resilience::outcome::{BreakerOpen, Outcome, Verdict};

#[derive(Debug)]
struct TickState {
    state: BreakerState,
    consecutive_failures: u32,
    failures_since_probe: u32,
    generation: u64,
}

impl TickState {
    /// Apply one tick. Returns the transition, if any.
    fn tick(&mut self, threshold: u32) -> Option<(BreakerState, BreakerState)> {
        let previous = self.state;
        match self.state {
            BreakerState::Open => {
                self.state = BreakerState::HalfOpen;
                self.failures_since_probe = 0;
            }
            BreakerState::HalfOpen => {
                if self.failures_since_probe == 0 {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                } else {
                    self.state = BreakerState::Open;
                    self.generation += 1;
                }
            }
            BreakerState::Closed => {
                if self.consecutive_failures >= threshold {
                    self.state = BreakerState::Open;
                    self.generation += 1;
                }
            }
        }
        (previous != self.state).then_some((previous, self.state))
    }
}

/// Circuit breaker driven by a background ticker.
#[derive(Debug)]
pub struct TickingBreaker {
    name: String,
    tick: Duration,
    shared: Arc<Mutex<TickState>>,
    stop: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl TickingBreaker {
    /// Create a closed breaker and spawn its ticker on the current runtime.
    pub fn start(name: impl Into<String>, threshold: u32, tick: Duration) -> Self {
        let name = name.into();
        let threshold = threshold.max(1);
        let shared = Arc::new(Mutex::new(TickState {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            failures_since_probe: 0,
            generation: 0,
        }));
        let stop = CancellationToken::new();

        metrics::record_breaker_state(&name, BreakerState::Closed);
        let handle = tokio::spawn(run_ticker(
            name.clone(),
            threshold,
            tick,
            shared.clone(),
            stop.clone(),
        ));

        Self {
            name,
            tick,
            shared,
            stop,
            ticker: Mutex::new(Some(handle)),
        }
    }

    /// Run `op` once if the breaker admits it.
    pub async fn execute<O: Operation>(
        &self,
        op: &O,
        cancel: &CancellationToken,
    ) -> Result<Outcome<O::Output, O::Error>, BreakerOpen> {
        guard(self, op, cancel).await
    }

    /// Halt the ticker. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Halt the ticker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .ticker
            .lock()
            .expect("ticker handle mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .expect("ticker handle mutex poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> MutexGuard<'_, TickState> {
        self.shared.lock().expect("circuit breaker mutex poisoned")
    }
}

impl Drop for TickingBreaker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_ticker(
    name: String,
    threshold: u32,
    tick: Duration,
    shared: Arc<Mutex<TickState>>,
    stop: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + tick, tick);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let transition = shared
                    .lock()
                    .expect("circuit breaker mutex poisoned")
                    .tick(threshold);
                if let Some((from, to)) = transition {
                    metrics::record_breaker_transition(&name, from, to);
                    tracing::info!(breaker = %name, from = from.as_str(), to = to.as_str(), "Circuit breaker transition");
                }
            }
            _ = stop.cancelled() => {
                tracing::debug!(breaker = %name, "Circuit breaker ticker stopped");
                break;
            }
        }
    }
}

impl Breaker for TickingBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn admit(&self) -> Result<Admission, BreakerOpen> {
        let state = self.lock();
        if state.state == BreakerState::Open {
            metrics::record_breaker_rejection(&self.name);
            return Err(BreakerOpen {
                breaker: self.name.clone(),
                retry_after: self.tick,
            });
        }
        Ok(Admission::new(state.generation))
    }

    fn record(&self, admission: Admission, verdict: Verdict) {
        let mut state = self.lock();
        if admission.generation() != state.generation {
            return;
        }
        assert!(
            state.state != BreakerState::Open,
            "circuit breaker '{}' internal state corrupted: outcome recorded while open",
            self.name
        );

        match verdict {
            Verdict::Success => {
                if state.state == BreakerState::Closed {
                    state.consecutive_failures = 0;
                }
            }
            Verdict::Recoverable => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.state == BreakerState::HalfOpen {
                    state.failures_since_probe += 1;
                }
            }
            Verdict::Fatal | Verdict::Cancelled => {}
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            cooldown: self.tick,
            retry_after: (state.state == BreakerState::Open).then_some(self.tick),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    /// Start a breaker and move to the middle of its first tick period so
    /// later sleeps never land on a tick instant.
    async fn start(threshold: u32) -> TickingBreaker {
        let cb = TickingBreaker::start("ticking", threshold, TICK);
        time::sleep(TICK / 2).await;
        cb
    }

    async fn ticks(n: u32) {
        time::sleep(TICK * n).await;
    }

    fn fail(cb: &TickingBreaker, times: u32) {
        for _ in 0..times {
            let admission = cb.admit().unwrap();
            cb.record(admission, Verdict::Recoverable);
        }
    }

    #[test]
    fn test_tick_transitions() {
        let mut state = TickState {
            state: BreakerState::Closed,
            consecutive_failures: 2,
            failures_since_probe: 0,
            generation: 0,
        };
        assert_eq!(state.tick(3), None);

        state.consecutive_failures = 3;
        assert_eq!(state.tick(3), Some((BreakerState::Closed, BreakerState::Open)));
        assert_eq!(state.generation, 1);
        assert_eq!(state.tick(3), Some((BreakerState::Open, BreakerState::HalfOpen)));

        state.failures_since_probe = 1;
        assert_eq!(state.tick(3), Some((BreakerState::HalfOpen, BreakerState::Open)));
        assert_eq!(state.generation, 2);

        state.tick(3);
        assert_eq!(state.tick(3), Some((BreakerState::HalfOpen, BreakerState::Closed)));
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_tick_then_recovers() {
        let cb = start(2).await;
        fail(&cb, 2);
        // Polling: still closed until the next tick.
        assert_eq!(cb.state(), BreakerState::Closed);

        ticks(1).await;
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.admit().is_err());

        ticks(1).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        let probe = cb.admit().unwrap();
        cb.record(probe, Verdict::Success);

        ticks(1).await;
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        cb.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = start(1).await;
        fail(&cb, 1);
        ticks(2).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        fail(&cb, 1);
        ticks(1).await;
        assert_eq!(cb.state(), BreakerState::Open);
        cb.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_after_tick_trip() {
        let cb = start(1).await;
        let slow = cb.admit().unwrap();
        fail(&cb, 1);
        ticks(1).await;
        assert_eq!(cb.state(), BreakerState::Open);

        // Would panic if it were not recognised as stale.
        cb.record(slow, Verdict::Recoverable);
        assert_eq!(cb.state(), BreakerState::Open);
        cb.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_ticker() {
        let cb = start(1).await;
        assert!(cb.is_running());

        cb.stop();
        cb.stop();
        cb.shutdown().await;
        cb.shutdown().await;
        assert!(!cb.is_running());

        // No more transitions once stopped.
        fail(&cb, 1);
        ticks(3).await;
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_ticker() {
        let cb = TickingBreaker::start("ticking", 1, TICK);
        let stop = cb.stop.clone();
        drop(cb);
        assert!(stop.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_rejects_when_open() {
        let cb = start(1).await;
        fail(&cb, 1);
        ticks(1).await;

        let op = |_cancel: CancellationToken| async { Outcome::<u32, ()>::Success(1) };
        let err = cb.execute(&op, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.retry_after, TICK);
        cb.shutdown().await;
    }
}
