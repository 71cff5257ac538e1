//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller builds one idempotent Operation (e.g. a TransportCall)
//!     → circuit_breaker.rs (admit, or reject with BreakerOpen)
//!     → one executor:
//!         retries.rs         sequential attempts with backoff.rs sleeps
//!         hedged.rs          attempts launched every `delay`, first success wins
//!         scatter_gather.rs  all attempts at once, first success wins
//!     → circuit_breaker.rs (record the final Verdict)
//!     → Outcome returned to the caller
//! ```
//!
//! # Design Decisions
//! - Executors compose by delegation: every executor can `bind` an operation
//!   into a new operation
//! - A breaker wrapping an executor sees one verdict per call, so failures
//!   absorbed by retries are not counted
//! - Cancellation is a first-class outcome and never counts as a failure
//! - Deadlines are cancellation scopes (timeouts.rs), not failures
//! - Only breaker state is shared between concurrent callers

pub mod backoff;
pub mod circuit_breaker;
mod fanout;
pub mod hedged;
pub mod operation;
pub mod outcome;
pub mod registry;
pub mod retries;
pub mod scatter_gather;
pub mod ticking;
pub mod timeouts;

pub use backoff::{Backoff, BackoffKind, BackoffStrategy, CooldownBackoff};
pub use circuit_breaker::{guard, Admission, Breaker, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use hedged::{HedgedExecutor, Hedging};
pub use operation::Operation;
pub use outcome::{flatten, BreakerOpen, Outcome, ResilienceError, Verdict};
pub use registry::BreakerRegistry;
pub use retries::{RetryExecutor, Retrying};
pub use scatter_gather::{GatherPolicy, Gathering, ScatterGatherExecutor};
pub use ticking::TickingBreaker;
pub use timeouts::Deadline;
