//! Scatter-gather.
//!
//! Every attempt is launched at once under one cancellation scope and the
//! first success wins.
//!
//! # Gather Policies
//! - [`GatherPolicy::AllTerminal`] (default): a failure is only final once
//!   no attempt remains that could still succeed. The first fatal failure
//!   is then reported, else the first recoverable one.
//! - [`GatherPolicy::FirstTerminal`]: the first terminal outcome wins,
//!   success or not. This is racy: a fast failure can beat a concurrently
//!   succeeding attempt. Kept for compatibility with older deployments.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ScatterGatherConfig;
use crate::resilience::fanout::Race;
use crate::resilience::operation::Operation;
use crate::resilience::outcome::Outcome;

/// How a failed attempt is folded into the overall outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherPolicy {
    /// Wait for every attempt before declaring failure.
    #[default]
    AllTerminal,
    /// Return the first terminal outcome observed.
    FirstTerminal,
}

#[derive(Debug, Clone)]
pub struct ScatterGatherExecutor {
    concurrency: usize,
    policy: GatherPolicy,
}

impl ScatterGatherExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy: GatherPolicy::default(),
        }
    }

    pub fn from_config(config: &ScatterGatherConfig) -> Self {
        Self::new(config.concurrency).with_policy(config.policy)
    }

    pub fn with_policy(mut self, policy: GatherPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn policy(&self) -> GatherPolicy {
        self.policy
    }

    pub async fn execute<O>(&self, op: Arc<O>, cancel: &CancellationToken) -> Outcome<O::Output, O::Error>
    where
        O: Operation + 'static,
    {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let mut race = Race::new(cancel, "scatter_gather", self.policy);
        for _ in 0..self.concurrency {
            race.launch(&op);
        }
        tracing::debug!(concurrency = self.concurrency, policy = ?self.policy, "Scattered attempts");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                joined = race.next() => match joined {
                    Some(joined) => {
                        if let Some(outcome) = race.settle(joined) {
                            return outcome;
                        }
                    }
                    None => return race.exhausted(),
                },
            }
        }
    }

    pub fn bind<O: Operation + 'static>(&self, op: O) -> Gathering<O> {
        Gathering {
            executor: self.clone(),
            op: Arc::new(op),
        }
    }
}

/// An operation that runs its inner operation through a
/// [`ScatterGatherExecutor`].
#[derive(Debug)]
pub struct Gathering<O> {
    executor: ScatterGatherExecutor,
    op: Arc<O>,
}

impl<O> Clone for Gathering<O> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            op: Arc::clone(&self.op),
        }
    }
}

impl<O: Operation + 'static> Operation for Gathering<O> {
    type Output = O::Output;
    type Error = O::Error;

    fn attempt(
        &self,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Outcome<O::Output, O::Error>> + Send {
        async move { self.executor.execute(Arc::clone(&self.op), &cancel).await }
    }
}
