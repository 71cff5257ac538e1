//! Outcome classification shared by every execution strategy.
//!
//! # Classes
//! - Success: the remote operation completed without a server error
//! - Recoverable: transport error or server error; eligible for retry and breaker counting
//! - Fatal: malformed usage; never retried, never counted
//! - Cancelled: the caller (or a winning sibling attempt) cancelled the scope; never a failure

use std::time::Duration;
use thiserror::Error;

/// Result of one logical or physical attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Success(T),
    Recoverable(E),
    Fatal(E),
    Cancelled,
}

/// The class of an [`Outcome`] with the payload stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Success,
    Recoverable,
    Fatal,
    Cancelled,
}

impl Verdict {
    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Recoverable => "recoverable",
            Verdict::Fatal => "fatal",
            Verdict::Cancelled => "cancelled",
        }
    }
}

impl<T, E> Outcome<T, E> {
    pub fn verdict(&self) -> Verdict {
        match self {
            Outcome::Success(_) => Verdict::Success,
            Outcome::Recoverable(_) => Verdict::Recoverable,
            Outcome::Fatal(_) => Verdict::Fatal,
            Outcome::Cancelled => Verdict::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Map the success payload, keeping the classification.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Recoverable(e) => Outcome::Recoverable(e),
            Outcome::Fatal(e) => Outcome::Fatal(e),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }

    /// Convert into a `Result`, keeping the failure class in the error.
    pub fn into_result(self) -> Result<T, ResilienceError<E>> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Recoverable(e) => Err(ResilienceError::Recoverable(e)),
            Outcome::Fatal(e) => Err(ResilienceError::Fatal(e)),
            Outcome::Cancelled => Err(ResilienceError::Cancelled),
        }
    }
}

/// Admission denied by an open circuit breaker. No attempt was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is open (retry after {retry_after:?})")]
pub struct BreakerOpen {
    pub breaker: String,
    /// Time left until the breaker admits a half-open probe.
    pub retry_after: Duration,
}

/// Failure taxonomy surfaced to callers.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    #[error(transparent)]
    BreakerOpen(#[from] BreakerOpen),

    #[error("recoverable failure: {0}")]
    Recoverable(E),

    #[error("fatal failure: {0}")]
    Fatal(E),

    #[error("operation cancelled")]
    Cancelled,
}

impl<E> ResilienceError<E> {
    /// True for failures that may succeed if the caller tries again later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ResilienceError::BreakerOpen(_) | ResilienceError::Recoverable(_))
    }
}

/// Flatten a guarded outcome into the caller-facing result.
pub fn flatten<T, E>(guarded: Result<Outcome<T, E>, BreakerOpen>) -> Result<T, ResilienceError<E>> {
    guarded?.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdicts() {
        assert_eq!(Outcome::<u8, ()>::Success(1).verdict(), Verdict::Success);
        assert_eq!(Outcome::<u8, ()>::Recoverable(()).verdict(), Verdict::Recoverable);
        assert_eq!(Outcome::<u8, ()>::Fatal(()).verdict(), Verdict::Fatal);
        assert_eq!(Outcome::<u8, ()>::Cancelled.verdict(), Verdict::Cancelled);
        assert_eq!(Verdict::Recoverable.as_str(), "recoverable");
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Outcome::<u8, &str>::Success(3).into_result().unwrap(), 3);
        assert!(matches!(
            Outcome::<u8, &str>::Fatal("bad uri").into_result(),
            Err(ResilienceError::Fatal("bad uri"))
        ));
        assert!(matches!(
            Outcome::<u8, &str>::Cancelled.into_result(),
            Err(ResilienceError::Cancelled)
        ));
    }

    #[test]
    fn test_breaker_open_is_recoverable() {
        let open = BreakerOpen {
            breaker: "users".into(),
            retry_after: Duration::from_millis(250),
        };
        let err = flatten::<u8, &str>(Err(open));
        let err = err.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("users"));
        assert!(!ResilienceError::<&str>::Fatal("x").is_recoverable());
    }
}
