//! Deadline enforcement.
//!
//! None of the executors impose a timeout of their own. A caller deadline
//! is expressed as cancellation: [`Deadline`] derives a child scope that is
//! cancelled when the deadline passes, so an exceeded deadline surfaces as
//! [`Outcome::Cancelled`](crate::resilience::Outcome::Cancelled) rather than
//! as a recoverable failure.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A cancellation scope that also fires after a fixed timeout.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Start the clock. The returned scope is also cancelled with `parent`.
    pub fn start(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let expire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = expire.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::debug!(timeout = ?timeout, "Deadline exceeded");
                    expire.cancel();
                }
            }
        });
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
