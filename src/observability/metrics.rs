//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (attempts, retries, hedges, breaker state, latency)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-strategy and per-breaker metrics
//!
//! # Metrics
//! - `client_attempts_total` (counter): physical attempts by strategy, verdict
//! - `client_retries_total` (counter): backoff sleeps taken
//! - `client_hedges_launched_total` (counter): attempts launched after the first
//! - `client_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `client_breaker_transitions_total` (counter): by breaker, from, to
//! - `client_breaker_rejections_total` (counter): calls rejected while open
//! - `client_request_duration_seconds` (histogram): logical call latency
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels for strategy, verdict and breaker name only

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::BreakerState;
use crate::resilience::outcome::Verdict;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_attempt(strategy: &'static str, verdict: Verdict) {
    ::metrics::counter!(
        "client_attempts_total",
        "strategy" => strategy,
        "verdict" => verdict.as_str()
    )
    .increment(1);
}

pub fn record_retry() {
    ::metrics::counter!("client_retries_total").increment(1);
}

pub fn record_hedge_launched() {
    ::metrics::counter!("client_hedges_launched_total").increment(1);
}

pub fn record_breaker_state(breaker: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    ::metrics::gauge!("client_breaker_state", "breaker" => breaker.to_string()).set(value);
}

/// Count a transition and update the state gauge.
pub fn record_breaker_transition(breaker: &str, from: BreakerState, to: BreakerState) {
    ::metrics::counter!(
        "client_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_breaker_rejection(breaker: &str) {
    ::metrics::counter!("client_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_request_duration(strategy: &'static str, outcome: &'static str, start: Instant) {
    ::metrics::histogram!(
        "client_request_duration_seconds",
        "strategy" => strategy,
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}
