//! Request construction and per-request instrumentation.
//!
//! [`RequestBuilder`] turns a [`RequestMetadata`] into a fully configured
//! `reqwest::Request` plus a [`RequestContext`]. The context tracks the
//! exchange through an explicit [`Outcome`] and emits the log records and
//! telemetry event for it when it is settled.
//!
//! Headers are applied in a fixed order so that later sources win on a name
//! collision: `User-Agent`, default headers, operation headers,
//! authentication headers, then `X-Request-Id`.

use crate::auth::AuthHeaderProvider;
use crate::config::ClientConfig;
use crate::metadata::RequestMetadata;
use crate::telemetry::{CompletionEvent, FailureEvent, TelemetrySink};
use crate::{Error, Result};
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Header carrying the correlation id on instrumented requests.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Query parameter carrying the correlation id when enabled.
pub const REQUEST_ID_QUERY_PARAM: &str = "_reqId";

/// Resolves a request path against the base URL.
///
/// Absolute URLs are returned unchanged. Relative paths are appended to the
/// base URL's path; characters that are already percent-encoded are not
/// encoded again.
///
/// # Errors
///
/// Returns an error if the base URL cannot carry a path.
///
/// # Examples
///
/// ```
/// use opcall::request::resolve_url;
/// use url::Url;
///
/// let base = Url::parse("https://api.test/v1/").unwrap();
/// let url = resolve_url(&base, "/orders/a%20b?page=2").unwrap();
/// assert_eq!(url.as_str(), "https://api.test/v1/orders/a%20b?page=2");
/// ```
pub fn resolve_url(base: &Url, path: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(path) {
        if !absolute.cannot_be_a_base() {
            return Ok(absolute);
        }
    }

    if base.cannot_be_a_base() {
        return Err(Error::ConfigurationError(format!(
            "Base URL cannot carry a path: {base}"
        )));
    }

    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    if query.is_some() {
        url.set_query(query);
    }
    Ok(url)
}

/// Generates a 128-bit correlation id as 32 lowercase hex characters.
pub fn new_request_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

/// Terminal state of an exchange, as seen by its [`RequestContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not settled yet.
    Pending,
    /// A 2xx response was received.
    Success {
        /// Response status.
        status: StatusCode,
        /// Response `Content-Length`, when known.
        content_length: Option<u64>,
    },
    /// A non-2xx response was received, or no response at all.
    Failure {
        /// Response status, `None` for transport failures.
        status: Option<StatusCode>,
        /// Description of the failure.
        error: String,
    },
}

impl Outcome {
    /// Returns `true` while the exchange has not been settled.
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// How much instrumentation a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrumentation {
    /// Correlation id, begin/end/error log records, timed telemetry.
    Verbose,
    /// Telemetry only, without a correlation id or timing.
    Telemetry,
    /// Nothing is recorded.
    Off,
}

/// Per-request state, created fresh for every call.
pub struct RequestContext {
    request_id: Option<String>,
    method: Method,
    url: Url,
    instrumentation: Instrumentation,
    sink: Option<Arc<dyn TelemetrySink>>,
    started: Option<Instant>,
    outcome: Outcome,
}

impl RequestContext {
    /// The correlation id, present only on verbose requests.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The final request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The instrumentation level chosen for this request.
    pub fn instrumentation(&self) -> Instrumentation {
        self.instrumentation
    }

    /// The current outcome.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Marks the request as dispatched.
    ///
    /// On verbose requests this starts the stopwatch and emits the begin record.
    pub fn begin(&mut self) {
        if self.instrumentation != Instrumentation::Verbose {
            return;
        }
        self.started = Some(Instant::now());
        tracing::info!(
            request_id = self.request_id.as_deref().unwrap_or_default(),
            method = %self.method,
            url = %self.url,
            "HTTP BEGIN"
        );
    }

    /// Settles the exchange.
    ///
    /// Only the first transition out of [`Outcome::Pending`] is recorded;
    /// it emits at most one log record and at most one telemetry event.
    /// Returns `false` if the context was already settled.
    pub fn settle(&mut self, outcome: Outcome) -> bool {
        if !self.outcome.is_pending() || outcome.is_pending() {
            return false;
        }

        let elapsed = self.elapsed();
        let request_id = self.request_id.clone().unwrap_or_default();
        let verbose = self.instrumentation == Instrumentation::Verbose;

        match &outcome {
            Outcome::Success {
                status,
                content_length,
            } => {
                if verbose {
                    tracing::info!(
                        request_id = %request_id,
                        status = status.as_u16(),
                        method = %self.method,
                        url = %self.url,
                        elapsed_ms = elapsed.as_millis() as u64,
                        content_length = *content_length,
                        "HTTP END"
                    );
                }
                if let Some(sink) = &self.sink {
                    sink.on_request_completed(&CompletionEvent {
                        request_id,
                        method: self.method.clone(),
                        url: self.url.to_string(),
                        status: status.as_u16(),
                        elapsed,
                        content_length: *content_length,
                    });
                }
            }
            Outcome::Failure { status, error } => {
                let status = status.map(|s| s.as_u16()).unwrap_or(0);
                if verbose {
                    tracing::error!(
                        request_id = %request_id,
                        status,
                        method = %self.method,
                        url = %self.url,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %error,
                        "HTTP ERR"
                    );
                }
                if let Some(sink) = &self.sink {
                    sink.on_request_failed(&FailureEvent {
                        request_id,
                        method: self.method.clone(),
                        url: self.url.to_string(),
                        status,
                        elapsed,
                        error: error.clone(),
                    });
                }
            }
            Outcome::Pending => {}
        }

        self.outcome = outcome;
        true
    }

    // Only verbose requests run a stopwatch; the others report zero.
    fn elapsed(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("instrumentation", &self.instrumentation)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// A request ready for the transport, with its context.
#[derive(Debug)]
pub struct PreparedRequest {
    /// The configured HTTP request.
    pub request: reqwest::Request,
    /// Per-request instrumentation state.
    pub context: RequestContext,
}

/// Builds configured requests from [`RequestMetadata`].
pub struct RequestBuilder<'a> {
    http: &'a reqwest::Client,
    config: &'a ClientConfig,
    auth: &'a dyn AuthHeaderProvider,
}

impl<'a> RequestBuilder<'a> {
    /// Creates a builder over a shared HTTP client, configuration and auth provider.
    pub fn new(
        http: &'a reqwest::Client,
        config: &'a ClientConfig,
        auth: &'a dyn AuthHeaderProvider,
    ) -> Self {
        Self { http, config, auth }
    }

    /// Builds a request.
    ///
    /// `verbose` is the client's instrumentation flag, read once by the
    /// caller for this request.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved or the request cannot
    /// be assembled.
    pub fn build(&self, metadata: &RequestMetadata, verbose: bool) -> Result<PreparedRequest> {
        let mut url = resolve_url(&self.config.base_url, &metadata.path)?;
        if !metadata.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &metadata.query_params {
                pairs.append_pair(key, value);
            }
        }

        let instrumentation = if verbose {
            Instrumentation::Verbose
        } else if self.config.telemetry_sink.is_some() {
            Instrumentation::Telemetry
        } else {
            Instrumentation::Off
        };

        let request_id = (instrumentation == Instrumentation::Verbose).then(new_request_id);
        if let Some(id) = &request_id {
            if self.config.include_request_id_query {
                url.query_pairs_mut().append_pair(REQUEST_ID_QUERY_PARAM, id);
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, self.config.user_agent.clone());
        for (name, value) in &self.config.default_headers {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &metadata.headers {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.auth.auth_headers() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(id) = &request_id {
            let value = HeaderValue::try_from(id.as_str())
                .map_err(|e| Error::ConfigurationError(format!("Invalid request id: {}", e)))?;
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let mut builder = self
            .http
            .request(metadata.method.clone(), url.clone())
            .timeout(self.config.timeout)
            .headers(headers);

        if let Some(body) = &metadata.body {
            builder = builder.json(body);
        }

        let request = builder
            .build()
            .map_err(|e| Error::ConfigurationError(format!("Failed to build request: {}", e)))?;

        let sink = match instrumentation {
            Instrumentation::Off => None,
            _ => self.config.telemetry_sink.clone(),
        };

        Ok(PreparedRequest {
            request,
            context: RequestContext {
                request_id,
                method: metadata.method.clone(),
                url,
                instrumentation,
                sink,
                started: None,
                outcome: Outcome::Pending,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{BasicAuthProvider, NoAuth};
    use http::header::AUTHORIZATION;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    #[derive(Default)]
    struct RecordingSink {
        completed: Mutex<Vec<CompletionEvent>>,
        failed: Mutex<Vec<FailureEvent>>,
    }

    impl TelemetrySink for RecordingSink {
        fn on_request_completed(&self, event: &CompletionEvent) {
            self.completed.lock().unwrap().push(event.clone());
        }

        fn on_request_failed(&self, event: &FailureEvent) {
            self.failed.lock().unwrap().push(event.clone());
        }
    }

    struct OverridingAuth;

    impl AuthHeaderProvider for OverridingAuth {
        fn auth_headers(&self) -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert("x-custom", HeaderValue::from_static("from-auth"));
            headers
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .user_agent("opcall-tests/1.0")
            .unwrap()
            .default_header("X-Custom", "abc")
            .unwrap()
            .timeout(Duration::from_secs(7))
            .build()
            .unwrap()
    }

    fn health() -> RequestMetadata {
        RequestMetadata::new(Method::GET, "/health")
    }

    #[test]
    fn test_user_agent_default_headers_and_timeout() {
        let http = reqwest::Client::new();
        let config = config();
        let prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), false)
            .unwrap();

        let request = &prepared.request;
        assert_eq!(request.url().as_str(), "https://api.test/health");
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers().get(USER_AGENT).unwrap(), "opcall-tests/1.0");
        assert_eq!(request.headers().get("x-custom").unwrap(), "abc");
        assert_eq!(request.timeout(), Some(&Duration::from_secs(7)));
        assert!(request.headers().get(REQUEST_ID_HEADER).is_none());
        assert!(prepared.context.request_id().is_none());
        assert_eq!(prepared.context.instrumentation(), Instrumentation::Off);
    }

    #[test]
    fn test_auth_headers_override_defaults() {
        let http = reqwest::Client::new();
        let config = config();
        let prepared = RequestBuilder::new(&http, &config, &OverridingAuth)
            .build(&health(), false)
            .unwrap();

        let values: Vec<_> = prepared
            .request
            .headers()
            .get_all("x-custom")
            .iter()
            .collect();
        assert_eq!(values, ["from-auth"]);
    }

    #[test]
    fn test_basic_auth_attached() {
        let http = reqwest::Client::new();
        let config = config();
        let auth = BasicAuthProvider::new("alice", "secret");
        let prepared = RequestBuilder::new(&http, &config, &auth)
            .build(&health(), false)
            .unwrap();

        assert_eq!(
            prepared.request.headers().get(AUTHORIZATION).unwrap(),
            "Basic YWxpY2U6c2VjcmV0"
        );
    }

    #[test]
    fn test_verbose_adds_distinct_request_ids() {
        let http = reqwest::Client::new();
        let config = config();
        let builder = RequestBuilder::new(&http, &config, &NoAuth);

        let first = builder.build(&health(), true).unwrap();
        let second = builder.build(&health(), true).unwrap();

        let first_id = first.request.headers().get(REQUEST_ID_HEADER).unwrap();
        let second_id = second.request.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(first_id, first.context.request_id().unwrap());

        // Query opt-out leaves the URL untouched.
        assert_eq!(first.request.url().as_str(), "https://api.test/health");
        assert_eq!(first.context.instrumentation(), Instrumentation::Verbose);
    }

    #[test]
    fn test_verbose_query_param_matches_header() {
        let http = reqwest::Client::new();
        let config = ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .include_request_id_query(true)
            .build()
            .unwrap();
        let metadata = health().with_query_param("page", "2");
        let prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&metadata, true)
            .unwrap();

        let pairs: Vec<(String, String)> = prepared
            .request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let id = prepared.context.request_id().unwrap().to_string();
        assert_eq!(
            pairs,
            [
                ("page".to_string(), "2".to_string()),
                (REQUEST_ID_QUERY_PARAM.to_string(), id)
            ]
        );
        assert_eq!(prepared.request.url().path(), "/health");
    }

    #[test]
    fn test_query_param_requires_verbose() {
        let http = reqwest::Client::new();
        let config = ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .include_request_id_query(true)
            .build()
            .unwrap();
        let prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), false)
            .unwrap();

        assert_eq!(prepared.request.url().query(), None);
    }

    #[test]
    fn test_request_id_format() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://api.test").unwrap();
        assert_eq!(resolve_url(&base, "health").unwrap().as_str(), "https://api.test/health");

        let nested = Url::parse("https://api.test/v1").unwrap();
        assert_eq!(
            resolve_url(&nested, "/product/2024-12-31T23:59:58+00:00").unwrap().as_str(),
            "https://api.test/v1/product/2024-12-31T23:59:58+00:00"
        );
        assert_eq!(
            resolve_url(&nested, "/a%2Fb/c d").unwrap().path(),
            "/v1/a%2Fb/c%20d"
        );
        assert_eq!(
            resolve_url(&nested, "https://other.test/x").unwrap().as_str(),
            "https://other.test/x"
        );
    }

    #[test]
    fn test_settle_emits_once() {
        let http = reqwest::Client::new();
        let sink = Arc::new(RecordingSink::default());
        let config = ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .telemetry_sink(sink.clone())
            .build()
            .unwrap();
        let mut prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), false)
            .unwrap();
        let context = &mut prepared.context;

        assert_eq!(context.instrumentation(), Instrumentation::Telemetry);
        context.begin();
        assert!(context.settle(Outcome::Success {
            status: StatusCode::OK,
            content_length: Some(11),
        }));
        assert!(!context.settle(Outcome::Failure {
            status: None,
            error: "late".to_string(),
        }));

        let completed = sink.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, 200);
        assert_eq!(completed[0].request_id, "");
        assert_eq!(completed[0].elapsed, Duration::ZERO);
        assert_eq!(completed[0].content_length, Some(11));
        assert!(sink.failed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_verbose_failure_event_carries_id() {
        let http = reqwest::Client::new();
        let sink = Arc::new(RecordingSink::default());
        let config = ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .telemetry_sink(sink.clone())
            .build()
            .unwrap();
        let mut prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), true)
            .unwrap();

        prepared.context.begin();
        prepared.context.settle(Outcome::Failure {
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            error: "HTTP 503".to_string(),
        });

        let failed = sink.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, 503);
        assert_eq!(Some(failed[0].request_id.as_str()), prepared.context.request_id());
        assert!(sink.completed.lock().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct CapturedEvent {
        level: tracing::Level,
        fields: HashMap<String, String>,
    }

    impl CapturedEvent {
        fn field(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }
    }

    #[derive(Clone, Default)]
    struct CaptureLayer(Arc<Mutex<Vec<CapturedEvent>>>);

    struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

    impl Visit for FieldVisitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: layer::Context<'_, S>) {
            let mut fields = HashMap::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.0.lock().unwrap().push(CapturedEvent {
                level: *event.metadata().level(),
                fields,
            });
        }
    }

    fn capture<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let layer = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, f);
        let mut events = layer.0.lock().unwrap();
        std::mem::take(&mut *events)
    }

    #[test]
    fn test_verbose_success_logs_begin_and_end() {
        let http = reqwest::Client::new();
        let config = config();
        let mut prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), true)
            .unwrap();
        let id = prepared.context.request_id().unwrap().to_string();

        let events = capture(|| {
            prepared.context.begin();
            prepared.context.settle(Outcome::Success {
                status: StatusCode::OK,
                content_length: Some(11),
            });
        });

        assert_eq!(events.len(), 2);
        let begin = &events[0];
        assert_eq!(begin.level, tracing::Level::INFO);
        assert_eq!(begin.field("message"), Some("HTTP BEGIN"));
        assert_eq!(begin.field("request_id"), Some(id.as_str()));
        assert_eq!(begin.field("method"), Some("GET"));
        assert_eq!(begin.field("url"), Some("https://api.test/health"));

        let end = &events[1];
        assert_eq!(end.level, tracing::Level::INFO);
        assert_eq!(end.field("message"), Some("HTTP END"));
        assert_eq!(end.field("request_id"), Some(id.as_str()));
        assert_eq!(end.field("status"), Some("200"));
        assert_eq!(end.field("content_length"), Some("11"));
        assert!(end.field("elapsed_ms").is_some());
    }

    #[test]
    fn test_verbose_failure_logs_error_record() {
        let http = reqwest::Client::new();
        let config = config();
        let mut prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), true)
            .unwrap();
        let id = prepared.context.request_id().unwrap().to_string();

        let events = capture(|| {
            prepared.context.begin();
            prepared.context.settle(Outcome::Failure {
                status: None,
                error: "request timed out".to_string(),
            });
        });

        assert_eq!(events.len(), 2);
        let err = &events[1];
        assert_eq!(err.level, tracing::Level::ERROR);
        assert_eq!(err.field("message"), Some("HTTP ERR"));
        assert_eq!(err.field("request_id"), Some(id.as_str()));
        assert_eq!(err.field("status"), Some("0"));
        assert_eq!(err.field("error"), Some("request timed out"));
    }

    #[test]
    fn test_non_verbose_requests_log_nothing() {
        let http = reqwest::Client::new();
        let sink = Arc::new(RecordingSink::default());
        let config = ClientConfig::builder()
            .base_url("https://api.test")
            .unwrap()
            .telemetry_sink(sink.clone())
            .build()
            .unwrap();
        let mut prepared = RequestBuilder::new(&http, &config, &NoAuth)
            .build(&health(), false)
            .unwrap();

        let events = capture(|| {
            prepared.context.begin();
            prepared.context.settle(Outcome::Failure {
                status: Some(StatusCode::BAD_GATEWAY),
                error: "HTTP 502".to_string(),
            });
        });

        assert!(events.is_empty());
        assert_eq!(sink.failed.lock().unwrap().len(), 1);
    }
}
