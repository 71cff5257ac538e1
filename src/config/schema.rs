//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::{Backoff, BackoffKind, CooldownBackoff};
use crate::resilience::scatter_gather::GatherPolicy;

/// Root configuration for the resilient client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Circuit breaker settings, applied per dependency.
    pub breaker: BreakerConfig,

    /// Retry strategy settings.
    pub retry: RetryConfig,

    /// Hedged request settings.
    pub hedge: HedgeConfig,

    /// Scatter-gather settings.
    pub scatter_gather: ScatterGatherConfig,

    /// HTTP transport settings.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// How a breaker evaluates its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerMode {
    /// Evaluate transitions on admission.
    #[default]
    Inline,
    /// Evaluate transitions on a background ticker.
    Ticking,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive recoverable failures before the breaker opens.
    pub failure_threshold: u32,

    /// Cooldown of the first open cycle in milliseconds.
    pub cooldown_initial_ms: u64,

    /// Growth factor applied to the cooldown on each consecutive open cycle.
    pub cooldown_multiplier: f64,

    /// Upper bound for the cooldown in milliseconds.
    pub cooldown_max_ms: u64,

    /// Inline (lazy) or ticking evaluation.
    pub mode: BreakerMode,

    /// Tick interval for `mode = "ticking"`.
    pub tick_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_initial_ms: 500,
            cooldown_multiplier: 1.5,
            cooldown_max_ms: 60_000,
            mode: BreakerMode::Inline,
            tick_ms: 1_000,
        }
    }
}

impl BreakerConfig {
    /// Cooldown generator described by this config.
    pub fn cooldowns(&self) -> CooldownBackoff {
        CooldownBackoff::new(
            Duration::from_millis(self.cooldown_initial_ms),
            self.cooldown_multiplier,
            Duration::from_millis(self.cooldown_max_ms),
        )
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Wait between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff algorithm configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// constant, linear or exponential.
    pub kind: BackoffKind,

    /// Base unit of the algorithm in milliseconds.
    pub quantum_ms: u64,

    /// Spread each wait by +/- 33%.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            quantum_ms: 100,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn to_backoff(&self) -> Backoff {
        let backoff = Backoff {
            kind: self.kind,
            quantum: Duration::from_millis(self.quantum_ms),
            jitter: false,
        };
        if self.jitter {
            backoff.jittered()
        } else {
            backoff
        }
    }
}

/// Hedged request configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HedgeConfig {
    /// Interval between launches in milliseconds.
    pub delay_ms: u64,

    /// Total attempts, including the first one.
    pub concurrency: usize,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            delay_ms: 50,
            concurrency: 3,
        }
    }
}

/// Scatter-gather configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScatterGatherConfig {
    /// Attempts launched at once.
    pub concurrency: usize,

    /// all_terminal (default) or the legacy first_terminal.
    pub policy: GatherPolicy,
}

impl Default for ScatterGatherConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            policy: GatherPolicy::AllTerminal,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Largest response body that will be buffered.
    pub max_response_bytes: usize,

    /// Statuses at or above this value are recoverable failures.
    pub error_status_threshold: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            pool_idle_timeout_secs: 90,
            max_response_bytes: 10 * 1024 * 1024,
            error_status_threshold: 500,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
