//! The unit of work every executor runs.
//!
//! An operation is idempotent: executors may run it zero, one or many
//! times, sequentially or concurrently. Each run is one physical attempt and
//! receives the cancellation scope it must honour.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::resilience::outcome::Outcome;

/// One idempotent, cancellable attempt producing a classified [`Outcome`].
pub trait Operation: Send + Sync {
    type Output: Send + 'static;
    type Error: Send + 'static;

    fn attempt(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Outcome<Self::Output, Self::Error>> + Send;
}

impl<F, Fut, T, E> Operation for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<T, E>> + Send,
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = T;
    type Error = E;

    fn attempt(&self, cancel: CancellationToken) -> impl Future<Output = Outcome<T, E>> + Send {
        (self)(cancel)
    }
}
