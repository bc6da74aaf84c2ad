//! Client configuration.
//!
//! [`ClientConfig`] is immutable once built and shared read-only by every
//! request. Use [`ClientConfigBuilder`] to create one, or
//! [`ClientConfig::from_env`] to load it from `API_*` environment variables.

use crate::telemetry::{ConsoleTelemetrySink, TelemetrySink};
use crate::{Error, Result};
use http::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("opcall/", env!("CARGO_PKG_VERSION"));

/// Environment variable holding the base URL (required).
pub const ENV_BASE_URL: &str = "API_BASE_URL";
/// Environment variable enabling the console telemetry sink.
pub const ENV_CONSOLE_TELEMETRY: &str = "API_ENABLE_CONSOLE_TELEMETRY";
/// Environment variable enabling the `_reqId` query parameter.
pub const ENV_INCLUDE_REQID_QUERY: &str = "API_INCLUDE_REQID_QUERY";
/// Environment variable overriding the timeout, in whole seconds.
pub const ENV_TIMEOUT_SECS: &str = "API_TIMEOUT_SECS";

/// Configuration shared by all requests issued by an [`ApiClient`](crate::ApiClient).
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) user_agent: HeaderValue,
    pub(crate) default_headers: Vec<(HeaderName, HeaderValue)>,
    pub(crate) include_request_id_query: bool,
    pub(crate) telemetry_sink: Option<Arc<dyn TelemetrySink>>,
    pub(crate) verbose: bool,
}

impl ClientConfig {
    /// Creates a new `ClientConfigBuilder`.
    ///
    /// # Examples
    ///
    /// ```
    /// use opcall::ClientConfig;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), opcall::Error> {
    /// let config = ClientConfig::builder()
    ///     .base_url("https://api.example.com")?
    ///     .timeout(Duration::from_secs(30))
    ///     .default_header("X-Tenant", "acme")?
    ///     .build()?;
    ///
    /// assert_eq!(config.timeout(), Duration::from_secs(30));
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `API_BASE_URL` is missing or invalid, or if
    /// `API_TIMEOUT_SECS` is not an integer.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_BASE_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                Error::ConfigurationError(format!("{ENV_BASE_URL} env var is required"))
            })?;

        let mut builder = Self::builder()
            .base_url(base_url.trim())?
            .include_request_id_query(flag(lookup(ENV_INCLUDE_REQID_QUERY)));

        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::ConfigurationError(format!(
                    "{ENV_TIMEOUT_SECS} must be a whole number of seconds, got {secs:?}"
                ))
            })?;
            builder = builder.timeout(Duration::from_secs(secs));
        }

        if flag(lookup(ENV_CONSOLE_TELEMETRY)) {
            builder = builder.telemetry_sink(Arc::new(ConsoleTelemetrySink));
        }

        builder.build()
    }

    /// The absolute base URL every operation path is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The `User-Agent` header value.
    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    /// Default headers, in the order they are applied.
    pub fn default_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.default_headers
    }

    /// Whether instrumented requests also carry the correlation id as `_reqId`.
    pub fn include_request_id_query(&self) -> bool {
        self.include_request_id_query
    }

    /// The configured telemetry sink, if any.
    pub fn telemetry_sink(&self) -> Option<&Arc<dyn TelemetrySink>> {
        self.telemetry_sink.as_ref()
    }

    /// Initial state of the client's verbose-instrumentation flag.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Replaces the telemetry sink.
    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry_sink = Some(sink);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("default_headers", &self.default_headers)
            .field("include_request_id_query", &self.include_request_id_query)
            .field("telemetry_sink", &self.telemetry_sink.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Builder for configuring and creating a [`ClientConfig`].
pub struct ClientConfigBuilder {
    base_url: Option<Url>,
    timeout: Duration,
    user_agent: HeaderValue,
    default_headers: Vec<(HeaderName, HeaderValue)>,
    include_request_id_query: bool,
    telemetry_sink: Option<Arc<dyn TelemetrySink>>,
    verbose: bool,
}

impl ClientConfigBuilder {
    /// Creates a new `ClientConfigBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
            default_headers: Vec::new(),
            include_request_id_query: false,
            telemetry_sink: None,
            verbose: false,
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or cannot serve as a base.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;
        if url.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL must be absolute: {url}"
            )));
        }
        self.base_url = Some(url);
        Ok(self)
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `User-Agent` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid header value.
    pub fn user_agent(mut self, user_agent: impl AsRef<str>) -> Result<Self> {
        self.user_agent = HeaderValue::try_from(user_agent.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// Headers are applied in the order they were added; a later header with
    /// the same name replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.push((name, value));
        Ok(self)
    }

    /// Appends the correlation id as a `_reqId` query parameter on
    /// instrumented requests.
    pub fn include_request_id_query(mut self, include: bool) -> Self {
        self.include_request_id_query = include;
        self
    }

    /// Sets the sink receiving completion and failure events.
    pub fn telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry_sink = Some(sink);
        self
    }

    /// Sets the initial verbose-instrumentation state of clients built from
    /// this configuration.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided.
    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        Ok(ClientConfig {
            base_url,
            timeout: self.timeout,
            user_agent: self.user_agent,
            default_headers: self.default_headers,
            include_request_id_query: self.include_request_id_query,
            telemetry_sink: self.telemetry_sink,
            verbose: self.verbose,
        })
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
