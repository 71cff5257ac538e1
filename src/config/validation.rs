//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, multiplier >= 1, cap >= initial)
//! - Validate addresses and log directives up front
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ClientConfig;

/// One semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `breaker.failure_threshold`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let breaker = &config.breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("breaker.failure_threshold", "must be at least 1"));
    }
    if breaker.cooldown_initial_ms == 0 {
        errors.push(ValidationError::new("breaker.cooldown_initial_ms", "must be greater than 0"));
    }
    if !breaker.cooldown_multiplier.is_finite() || breaker.cooldown_multiplier <= 1.0 {
        errors.push(ValidationError::new(
            "breaker.cooldown_multiplier",
            format!("must be a finite number greater than 1.0, got {}", breaker.cooldown_multiplier),
        ));
    }
    if breaker.cooldown_max_ms < breaker.cooldown_initial_ms {
        errors.push(ValidationError::new(
            "breaker.cooldown_max_ms",
            "must not be smaller than cooldown_initial_ms",
        ));
    }
    if breaker.tick_ms == 0 {
        errors.push(ValidationError::new("breaker.tick_ms", "must be greater than 0"));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }

    if config.hedge.concurrency == 0 {
        errors.push(ValidationError::new("hedge.concurrency", "must be at least 1"));
    }
    if config.hedge.delay_ms == 0 && config.hedge.concurrency > 1 {
        errors.push(ValidationError::new(
            "hedge.delay_ms",
            "must be greater than 0 when hedging (use scatter_gather for simultaneous attempts)",
        ));
    }

    if config.scatter_gather.concurrency == 0 {
        errors.push(ValidationError::new("scatter_gather.concurrency", "must be at least 1"));
    }

    let transport = &config.transport;
    if transport.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("transport.connect_timeout_ms", "must be greater than 0"));
    }
    if transport.max_response_bytes == 0 {
        errors.push(ValidationError::new("transport.max_response_bytes", "must be greater than 0"));
    }
    if !(100..=599).contains(&transport.error_status_threshold) {
        errors.push(ValidationError::new(
            "transport.error_status_threshold",
            "must be an HTTP status code (100-599)",
        ));
    }

    let observability = &config.observability;
    if let Err(e) = EnvFilter::try_new(&observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter directive: {}", e),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
