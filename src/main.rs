//! resilient-client
//!
//! Send HTTP requests through the resilience stack from the command line.
//!
//! ```text
//!     URL, method, headers, body
//!         → Request (buffered once)
//!         → ResilientClient::send (breaker + strategy)
//!         → status and body, or a JSON report per call
//! ```
//!
//! Ctrl-C cancels the in-flight call; the cancellation is reported, not
//! counted as a failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use resilient_client::config::{load_config, ClientConfig};
use resilient_client::observability::{init_logging, init_metrics};
use resilient_client::resilience::{BreakerSnapshot, Deadline, ResilienceError};
use resilient_client::{CallFailure, Request, ResilientClient, Response, Strategy};

#[derive(Parser, Debug)]
#[command(name = "resilient-client", version)]
#[command(about = "Send HTTP requests through a circuit breaker and a retry, hedging or scatter-gather strategy", long_about = None)]
struct Cli {
    /// Target URL (http:// only).
    url: String,

    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Strategy::Retry)]
    strategy: Strategy,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body, replayed on every attempt.
    #[arg(short, long)]
    data: Option<String>,

    /// Extra header as `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Deadline for each call; exceeding it cancels the call.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of sequential calls.
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Print one JSON report per call instead of the response body.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct CallReport {
    call: u32,
    request_id: String,
    strategy: Strategy,
    outcome: &'static str,
    status: Option<u16>,
    duration_ms: f64,
    body: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct BreakerReport {
    dependency: String,
    #[serde(flatten)]
    snapshot: BreakerSnapshot,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    init_logging(&config.observability)?;

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?)?;
    }

    tracing::info!(
        url = %cli.url,
        strategy = cli.strategy.as_str(),
        repeat = cli.repeat,
        "resilient-client v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let client = ResilientClient::from_config(&config);
    let cancel = CancellationToken::new();
    tokio::spawn(interrupt_signal(cancel.clone()));

    let mut failures = 0;
    for call in 1..=cli.repeat {
        if cancel.is_cancelled() {
            break;
        }

        let request = build_request(&cli)?;
        let request_id = request.id().to_string();
        let deadline = cli
            .timeout_ms
            .map(|ms| Deadline::start(&cancel, Duration::from_millis(ms)));
        let scope = deadline.as_ref().map_or_else(|| cancel.clone(), |d| d.token().clone());

        let start = Instant::now();
        let result = client.send(request, cli.strategy, &scope).await;
        if result.is_err() {
            failures += 1;
        }

        let report = report(call, request_id, cli.strategy, start, result);
        if cli.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_human(&report);
        }
    }

    if cli.json {
        let breakers: Vec<_> = client
            .breakers()
            .snapshots()
            .into_iter()
            .map(|(dependency, snapshot)| BreakerReport { dependency, snapshot })
            .collect();
        println!("{}", serde_json::json!({ "breakers": breakers }));
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_request(cli: &Cli) -> Result<Request, Box<dyn std::error::Error>> {
    let mut request = Request::parse(&cli.method, &cli.url)?;
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header '{}' must look like 'Name: value'", header))?;
        request = request.with_header(name, value)?;
    }
    if let Some(data) = &cli.data {
        request = request.with_body(data.clone());
    }
    Ok(request)
}

fn report(
    call: u32,
    request_id: String,
    strategy: Strategy,
    start: Instant,
    result: Result<Response, ResilienceError<CallFailure>>,
) -> CallReport {
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let (outcome, response, error) = match result {
        Ok(response) => ("success", Some(response), None),
        Err(err) => {
            let outcome = match &err {
                ResilienceError::BreakerOpen(_) => "breaker_open",
                ResilienceError::Recoverable(_) => "recoverable",
                ResilienceError::Fatal(_) => "fatal",
                ResilienceError::Cancelled => "cancelled",
            };
            let response = match err {
                ResilienceError::Recoverable(CallFailure::Status(ref response)) => Some(response.clone()),
                _ => None,
            };
            (outcome, response, Some(err.to_string()))
        }
    };

    CallReport {
        call,
        request_id,
        strategy,
        outcome,
        status: response.as_ref().map(|r| r.status.as_u16()),
        duration_ms,
        body: response.as_ref().map(Response::text),
        error,
    }
}

fn print_human(report: &CallReport) {
    match (&report.error, report.status) {
        (None, Some(status)) => {
            eprintln!("[{}] {} in {:.1}ms", report.call, status, report.duration_ms);
        }
        (Some(error), _) => {
            eprintln!("[{}] {} after {:.1}ms: {}", report.call, report.outcome, report.duration_ms, error);
        }
        (None, None) => {}
    }
    if let Some(body) = &report.body {
        println!("{}", body);
    }
}

/// Cancel in-flight work on Ctrl+C.
async fn interrupt_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, cancelling");
            cancel.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "Failed to install Ctrl+C handler"),
    }
}
