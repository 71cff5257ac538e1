//! Backoff algorithms.
//!
//! # Algorithms (attempt `n`, quantum `q`)
//! - Constant: `q`
//! - Linear: `n * q`
//! - Exponential: `2^n * q`
//!
//! Any of them can be jittered by +/- a third of the base value, drawn
//! uniformly from a process-wide generator seeded once.
//!
//! [`CooldownBackoff`] is the separate, stateful generator the circuit
//! breaker uses to grow its open-state cooldown between consecutive cycles.

use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

static JITTER_RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| Mutex::new(StdRng::from_entropy()));

/// Maps a zero-based attempt index to the wait before the next attempt.
pub trait BackoffStrategy: Send + Sync {
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Growth curve of a [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Closed set of backoff algorithms: kind × jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub quantum: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub fn constant(quantum: Duration) -> Self {
        Self { kind: BackoffKind::Constant, quantum, jitter: false }
    }

    pub fn linear(quantum: Duration) -> Self {
        Self { kind: BackoffKind::Linear, quantum, jitter: false }
    }

    pub fn exponential(quantum: Duration) -> Self {
        Self { kind: BackoffKind::Exponential, quantum, jitter: false }
    }

    /// Same algorithm with +/- 33% jitter.
    pub fn jittered(self) -> Self {
        Self { jitter: true, ..self }
    }

    /// The un-jittered value for `attempt`.
    pub fn base(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Constant => self.quantum,
            BackoffKind::Linear => self.quantum.saturating_mul(attempt),
            BackoffKind::Exponential => match 2u32.checked_pow(attempt) {
                Some(factor) => self.quantum.saturating_mul(factor),
                None if self.quantum.is_zero() => Duration::ZERO,
                None => Duration::MAX,
            },
        }
    }
}

impl BackoffStrategy for Backoff {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base(attempt);
        if self.jitter {
            jitter(base)
        } else {
            base
        }
    }
}

/// Draw uniformly from `[d - d/3, d + d/3]`, with `d/3` rounded half up to
/// the nanosecond.
pub fn jitter(d: Duration) -> Duration {
    let nanos = d.as_nanos();
    let max_jitter = (2 * nanos + 3) / 6;
    let offset = {
        let mut rng = JITTER_RNG.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..=2 * max_jitter)
    };
    let jittered = nanos - max_jitter + offset;
    duration_from_nanos(jittered)
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = nanos / 1_000_000_000;
    if secs > u64::MAX as u128 {
        return Duration::MAX;
    }
    Duration::new(secs as u64, (nanos % 1_000_000_000) as u32)
}

/// Exponentially growing, capped cooldown for consecutive open cycles.
#[derive(Debug, Clone)]
pub struct CooldownBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    current: Duration,
}

impl CooldownBackoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max,
            current: initial.min(max),
        }
    }

    /// Restart the sequence at the initial cooldown.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }

    /// Return the current cooldown and advance the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let value = self.current;
        let grown = self.current.as_nanos() as f64 * self.multiplier;
        self.current = if grown >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(grown as u64)
        };
        value
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for CooldownBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 1.5, Duration::from_secs(60))
    }
}
