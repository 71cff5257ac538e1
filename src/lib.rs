//! Resilient HTTP client library.
//!
//! Client-side resilience middleware: a circuit breaker per dependency in
//! front of one of four execution strategies (direct, retry with backoff,
//! hedged requests, scatter-gather), all over a pluggable [`Transport`].

pub mod client;
pub mod config;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use client::{ResilientClient, Strategy};
pub use config::ClientConfig;
pub use resilience::{Operation, Outcome, ResilienceError, Verdict};
pub use transport::{CallFailure, HttpTransport, Request, Response, Transport, TransportError};
