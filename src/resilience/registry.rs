//! Breaker registry.
//!
//! One breaker per remote dependency, created on first use from the shared
//! [`BreakerConfig`]. Concurrent first calls for the same dependency observe
//! the same breaker.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::{BreakerConfig, BreakerMode};
use crate::resilience::circuit_breaker::{Breaker, BreakerSnapshot, CircuitBreaker};
use crate::resilience::ticking::TickingBreaker;

pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<dyn Breaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Return the breaker for `dependency`, creating it if needed.
    ///
    /// Ticking breakers spawn their ticker, so this must run inside a Tokio
    /// runtime when `mode = "ticking"`.
    pub fn get_or_create(&self, dependency: &str) -> Arc<dyn Breaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = dependency, mode = ?self.config.mode, "Creating circuit breaker");
                self.build(dependency)
            })
            .clone()
    }

    fn build(&self, name: &str) -> Arc<dyn Breaker> {
        match self.config.mode {
            BreakerMode::Inline => Arc::new(CircuitBreaker::from_config(name, &self.config)),
            BreakerMode::Ticking => Arc::new(TickingBreaker::start(
                name,
                self.config.failure_threshold,
                Duration::from_millis(self.config.tick_ms),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Point-in-time view of every breaker, sorted by dependency.
    pub fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
