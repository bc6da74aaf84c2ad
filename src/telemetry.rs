//! Per-request telemetry events and sinks.
//!
//! Exactly one event is emitted for every request that reaches the network:
//! a [`CompletionEvent`] for 2xx responses, a [`FailureEvent`] otherwise.

use http::Method;
use std::time::Duration;

/// Emitted once per successful (2xx) exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    /// Correlation id, empty when instrumentation is off.
    pub request_id: String,
    /// HTTP method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// Response status code.
    pub status: u16,
    /// Time since the request was dispatched. Zero when instrumentation is off.
    pub elapsed: Duration,
    /// Response `Content-Length`, when known.
    pub content_length: Option<u64>,
}

/// Emitted once per failed exchange (non-2xx response or transport failure).
#[derive(Debug, Clone, PartialEq)]
pub struct FailureEvent {
    /// Correlation id, empty when instrumentation is off.
    pub request_id: String,
    /// HTTP method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// Response status code, `0` when no response was received.
    pub status: u16,
    /// Time since the request was dispatched. Zero when instrumentation is off.
    pub elapsed: Duration,
    /// Description of the underlying error.
    pub error: String,
}

/// Receives request telemetry.
///
/// Sinks are shared by every in-flight request and must tolerate concurrent
/// calls.
pub trait TelemetrySink: Send + Sync {
    /// Called after a successful exchange.
    fn on_request_completed(&self, event: &CompletionEvent);

    /// Called after a failed exchange.
    fn on_request_failed(&self, event: &FailureEvent);
}

/// Writes one line per event: completions to stdout, failures to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTelemetrySink;

impl ConsoleTelemetrySink {
    fn completed_line(event: &CompletionEvent) -> String {
        format!(
            "[http.completed] id={} status={} method={} url={} elapsedMs={} len={}",
            event.request_id,
            event.status,
            event.method,
            event.url,
            event.elapsed.as_millis(),
            event
                .content_length
                .map(|len| len.to_string())
                .unwrap_or_default()
        )
    }

    fn failed_line(event: &FailureEvent) -> String {
        format!(
            "[http.failed] id={} status={} method={} url={} elapsedMs={} error={}",
            event.request_id,
            event.status,
            event.method,
            event.url,
            event.elapsed.as_millis(),
            event.error
        )
    }
}

impl TelemetrySink for ConsoleTelemetrySink {
    fn on_request_completed(&self, event: &CompletionEvent) {
        println!("{}", Self::completed_line(event));
    }

    fn on_request_failed(&self, event: &FailureEvent) {
        eprintln!("{}", Self::failed_line(event));
    }
}

/// Records each event inside an `http.client` span, using OpenTelemetry
/// semantic-convention field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn on_request_completed(&self, event: &CompletionEvent) {
        let span = tracing::info_span!(
            "http.client",
            http.request_id = %event.request_id,
            http.method = %event.method,
            url.full = %event.url,
            http.status_code = event.status,
            http.response_content_length = event.content_length,
            http.elapsed_ms = event.elapsed.as_millis() as u64,
        );
        let _entered = span.enter();
        tracing::info!("http request completed");
    }

    fn on_request_failed(&self, event: &FailureEvent) {
        let span = tracing::info_span!(
            "http.client",
            http.request_id = %event.request_id,
            http.method = %event.method,
            url.full = %event.url,
            http.status_code = event.status,
            error = true,
            exception.message = %event.error,
            http.elapsed_ms = event.elapsed.as_millis() as u64,
        );
        let _entered = span.enter();
        tracing::warn!("http request failed");
    }
}
