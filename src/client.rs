//! Resilient client facade.
//!
//! # Data Flow
//! ```text
//! send(request, strategy)
//!     → BreakerRegistry (breaker for the request's dependency)
//!     → guard(breaker, strategy.bind(TransportCall))
//!     → Result<Response, ResilienceError<CallFailure>>
//! ```
//!
//! Every strategy runs behind the dependency's breaker, which records one
//! verdict per `send`.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::observability::metrics;
use crate::resilience::{
    flatten, guard, BreakerRegistry, BreakerSnapshot, HedgedExecutor, ResilienceError, RetryExecutor,
    ScatterGatherExecutor,
};
use crate::transport::{CallFailure, HttpTransport, Request, Response, StatusClassifier, Transport, TransportCall};

/// Execution strategy for one logical call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// A single attempt.
    Direct,
    /// Sequential attempts with backoff.
    #[default]
    Retry,
    /// Redundant attempts launched on a delay.
    Hedged,
    /// Redundant attempts launched at once.
    ScatterGather,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Retry => "retry",
            Strategy::Hedged => "hedged",
            Strategy::ScatterGather => "scatter_gather",
        }
    }
}

pub struct ResilientClient<T> {
    transport: Arc<T>,
    breakers: BreakerRegistry,
    retry: RetryExecutor,
    hedged: HedgedExecutor,
    scatter_gather: ScatterGatherExecutor,
    classifier: StatusClassifier,
}

impl ResilientClient<HttpTransport> {
    /// Client over the pooled HTTP transport.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(HttpTransport::new(&config.transport), config)
    }
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            retry: RetryExecutor::from_config(&config.retry),
            hedged: HedgedExecutor::from_config(&config.hedge),
            scatter_gather: ScatterGatherExecutor::from_config(&config.scatter_gather),
            classifier: StatusClassifier::new(config.transport.error_status_threshold),
        }
    }

    /// Send `request` using `strategy`, guarded by its dependency's breaker.
    pub async fn send(
        &self,
        request: Request,
        strategy: Strategy,
        cancel: &CancellationToken,
    ) -> Result<Response, ResilienceError<CallFailure>> {
        let start = Instant::now();
        let request_id = request.id();
        let dependency = request.dependency();
        let breaker = self.breakers.get_or_create(&dependency);
        let call = TransportCall::new(self.transport.clone(), request, self.classifier);

        let guarded = match strategy {
            Strategy::Direct => guard(breaker.as_ref(), &call, cancel).await,
            Strategy::Retry => guard(breaker.as_ref(), &self.retry.bind(call), cancel).await,
            Strategy::Hedged => guard(breaker.as_ref(), &self.hedged.bind(call), cancel).await,
            Strategy::ScatterGather => guard(breaker.as_ref(), &self.scatter_gather.bind(call), cancel).await,
        };

        let label = match &guarded {
            Ok(outcome) => outcome.verdict().as_str(),
            Err(_) => "rejected",
        };
        metrics::record_request_duration(strategy.as_str(), label, start);
        tracing::debug!(
            request_id = %request_id,
            dependency = %dependency,
            strategy = strategy.as_str(),
            outcome = label,
            duration = ?start.elapsed(),
            "Call finished"
        );

        flatten(guarded)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Breaker state for one dependency, if it has been called.
    pub fn breaker_snapshot(&self, dependency: &str) -> Option<BreakerSnapshot> {
        self.breakers
            .snapshots()
            .into_iter()
            .find(|(name, _)| name == dependency)
            .map(|(_, snapshot)| snapshot)
    }
}
