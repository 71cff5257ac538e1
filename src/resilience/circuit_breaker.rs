//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: dependency assumed down, attempts fail fast with [`BreakerOpen`]
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive recoverable failures >= threshold
//! Open → Half-Open: first admission after the cooldown deadline
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails, cooldown grows (capped)
//! ```
//!
//! # Design Decisions
//! - Transitions are evaluated lazily on admission; no background task
//! - One mutex around the state record; the attempt itself runs unlocked
//! - Once half-open, every caller is admitted until a probe outcome lands
//! - Fatal and cancelled outcomes never touch the counters
//! - Each admission carries the breaker generation (bumped on every trip);
//!   outcomes from an older generation are stale and dropped

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::backoff::CooldownBackoff;
use crate::resilience::operation::Operation;
use crate::resilience::outcome::{BreakerOpen, Outcome, Verdict};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half_open",
            BreakerState::Open => "open",
        }
    }
}

/// Ticket handed out by [`Breaker::admit`] and consumed by [`Breaker::record`].
#[derive(Debug)]
#[must_use = "an admission must be returned to the breaker with the attempt's verdict"]
pub struct Admission {
    generation: u64,
}

impl Admission {
    pub(crate) fn new(generation: u64) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Cooldown of the current (or last) open cycle.
    pub cooldown: Duration,
    /// Time left before an open breaker admits a probe.
    pub retry_after: Option<Duration>,
}

/// Admission gate shared by the breaker implementations.
pub trait Breaker: Send + Sync {
    fn name(&self) -> &str;

    /// Decide whether an attempt may run.
    fn admit(&self) -> Result<Admission, BreakerOpen>;

    /// Report the verdict of an admitted attempt.
    fn record(&self, admission: Admission, verdict: Verdict);

    fn snapshot(&self) -> BreakerSnapshot;
}

/// Run `op` once behind `breaker`.
///
/// The operation is not invoked when admission is denied. Wrapping an
/// executor (retry, hedged, scatter-gather) reports a single verdict for the
/// whole execution, not one per physical attempt.
pub async fn guard<B, O>(
    breaker: &B,
    op: &O,
    cancel: &CancellationToken,
) -> Result<Outcome<O::Output, O::Error>, BreakerOpen>
where
    B: Breaker + ?Sized,
    O: Operation,
{
    let admission = breaker.admit()?;
    let outcome = op.attempt(cancel.clone()).await;
    breaker.record(admission, outcome.verdict());
    Ok(outcome)
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    cooldown: Duration,
    /// Meaningful only while open or half-open.
    reopen_deadline: Option<Instant>,
    generation: u64,
    cooldowns: CooldownBackoff,
}

/// Lazily evaluated circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker that opens after `threshold` consecutive
    /// recoverable failures.
    pub fn new(name: impl Into<String>, threshold: u32, cooldowns: CooldownBackoff) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, BreakerState::Closed);
        Self {
            name,
            threshold: threshold.max(1),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                cooldown: Duration::ZERO,
                reopen_deadline: None,
                generation: 0,
                cooldowns,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, config.cooldowns())
    }

    /// Run `op` once if the breaker admits it.
    pub async fn execute<O: Operation>(
        &self,
        op: &O,
        cancel: &CancellationToken,
    ) -> Result<Outcome<O::Output, O::Error>, BreakerOpen> {
        guard(self, op, cancel).await
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn set_state(&self, inner: &mut Inner, next: BreakerState) {
        let previous = inner.state;
        inner.state = next;
        metrics::record_breaker_transition(&self.name, previous, next);
    }

    fn trip(&self, inner: &mut Inner, reset_cooldown: bool) {
        if reset_cooldown {
            inner.cooldowns.reset();
        }
        inner.cooldown = inner.cooldowns.next_backoff();
        inner.reopen_deadline = Some(Instant::now() + inner.cooldown);
        inner.generation += 1;
        self.set_state(inner, BreakerState::Open);

        tracing::warn!(
            breaker = %self.name,
            failures = inner.consecutive_failures,
            cooldown = ?inner.cooldown,
            "Circuit breaker opened"
        );
    }
}

impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn admit(&self) -> Result<Admission, BreakerOpen> {
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            let now = Instant::now();
            let deadline = inner.reopen_deadline.unwrap_or(now);
            if now < deadline {
                metrics::record_breaker_rejection(&self.name);
                return Err(BreakerOpen {
                    breaker: self.name.clone(),
                    retry_after: deadline - now,
                });
            }

            // Stay half-open for another cooldown window.
            inner.reopen_deadline = Some(now + inner.cooldown);
            self.set_state(&mut inner, BreakerState::HalfOpen);
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, probing");
        }

        Ok(Admission::new(inner.generation))
    }

    fn record(&self, admission: Admission, verdict: Verdict) {
        let mut inner = self.lock();

        if admission.generation != inner.generation {
            tracing::debug!(
                breaker = %self.name,
                verdict = verdict.as_str(),
                "Dropping outcome admitted before the breaker last opened"
            );
            return;
        }

        // Open breakers never admit, so a current-generation ticket cannot
        // exist while open.
        assert!(
            inner.state != BreakerState::Open,
            "circuit breaker '{}' internal state corrupted: outcome recorded while open",
            self.name
        );

        match verdict {
            Verdict::Success => {
                if inner.state == BreakerState::HalfOpen {
                    inner.reopen_deadline = None;
                    self.set_state(&mut inner, BreakerState::Closed);
                    tracing::info!(breaker = %self.name, "Circuit breaker closed");
                }
                inner.consecutive_failures = 0;
            }
            Verdict::Recoverable => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                match inner.state {
                    BreakerState::Closed if inner.consecutive_failures >= self.threshold => {
                        self.trip(&mut inner, true);
                    }
                    BreakerState::HalfOpen => self.trip(&mut inner, false),
                    _ => {}
                }
            }
            Verdict::Fatal | Verdict::Cancelled => {}
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after = match (inner.state, inner.reopen_deadline) {
            (BreakerState::Open, Some(deadline)) => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown: inner.cooldown,
            retry_after,
        }
    }
}
