//! The operation client.
//!
//! [`ApiClient`] composes the configuration, authentication, request builder,
//! error mapping and operation dispatch behind two calls:
//! [`list_operations`](ApiClient::list_operations) and
//! [`execute`](ApiClient::execute).

use crate::auth::AuthHeaderProvider;
use crate::config::ClientConfig;
use crate::dispatch::{OperationDispatcher, Transport};
use crate::metadata::RequestMetadata;
use crate::operation::OperationRegistry;
use crate::request::{Outcome, PreparedRequest, RequestBuilder};
use crate::{ApiError, Error, FailedExchange, Response, Result};
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A client that executes API operations by id.
///
/// The client is cheap to clone and safe to share across tasks. All
/// per-call state lives in the request's own context; the only mutable
/// state is the verbose-instrumentation flag, which each request reads once.
///
/// # Examples
///
/// ```no_run
/// use opcall::{ApiClient, ClientConfig, NoAuth, OperationRegistry, OperationSpec};
/// use http::Method;
///
/// # async fn example() -> Result<(), opcall::Error> {
/// let config = ClientConfig::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
/// let registry = OperationRegistry::new([
///     OperationSpec::new("getHealth", Method::GET, "/health"),
/// ])?;
///
/// let client = ApiClient::new(config, registry, NoAuth)?;
/// client.set_verbose(true);
///
/// let health = client.execute("getHealth", None).await?;
/// println!("{health}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: HttpTransport,
    dispatcher: OperationDispatcher,
}

impl ApiClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new<A>(config: ClientConfig, registry: OperationRegistry, auth: A) -> Result<Self>
    where
        A: AuthHeaderProvider + 'static,
    {
        let http = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: HttpTransport {
                    http,
                    verbose: AtomicBool::new(config.verbose),
                    config,
                    auth: Arc::new(auth),
                },
                dispatcher: OperationDispatcher::new(Arc::new(registry)),
            }),
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.transport.config
    }

    /// The operation dispatcher.
    pub fn dispatcher(&self) -> &OperationDispatcher {
        &self.inner.dispatcher
    }

    /// Turns verbose instrumentation on or off for subsequent requests.
    pub fn set_verbose(&self, verbose: bool) {
        self.inner.transport.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Returns `true` if verbose instrumentation is on.
    pub fn is_verbose(&self) -> bool {
        self.inner.transport.verbose.load(Ordering::Relaxed)
    }

    /// All known operation ids, in no particular order.
    pub fn list_operations(&self) -> Vec<String> {
        self.inner
            .dispatcher
            .list_operations()
            .map(str::to_string)
            .collect()
    }

    /// Executes an operation with an optional JSON input string.
    ///
    /// A missing or blank input means "no parameters".
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if the input is not valid JSON or
    /// does not fit the operation, [`Error::UnknownOperation`] if the id is
    /// not registered, and [`Error::Api`] if the exchange fails.
    pub async fn execute(&self, operation_id: &str, input: Option<&str>) -> Result<Value> {
        let input = match input.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                Error::malformed(operation_id, format!("input is not valid JSON: {e}"))
            })?),
            None => None,
        };
        self.execute_value(operation_id, input, &CancellationToken::new())
            .await
    }

    /// Executes an operation with an already-parsed input and a cancellation token.
    ///
    /// Cancelling the token aborts the exchange promptly with an
    /// [`ApiError`] whose status is `0`.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::execute`].
    pub async fn execute_value(
        &self,
        operation_id: &str,
        input: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.inner
            .dispatcher
            .execute(&self.inner.transport, operation_id, input, cancel)
            .await
    }

    /// Sends an ad-hoc request through the same pipeline as operations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for non-2xx responses and transport failures.
    pub async fn call(
        &self,
        metadata: RequestMetadata,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        self.inner.transport.send(metadata, cancel).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", self.config())
            .field("operations", &self.inner.dispatcher.registry().len())
            .field("verbose", &self.is_verbose())
            .finish()
    }
}

struct HttpTransport {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Arc<dyn AuthHeaderProvider>,
    verbose: AtomicBool,
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        metadata: RequestMetadata,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        let verbose = self.verbose.load(Ordering::Relaxed);
        let prepared = RequestBuilder::new(&self.http, &self.config, self.auth.as_ref())
            .build(&metadata, verbose)?;
        self.exchange(prepared, cancel).await
    }
}

impl HttpTransport {
    async fn exchange(
        &self,
        prepared: PreparedRequest,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        let PreparedRequest {
            request,
            mut context,
        } = prepared;

        let method = context.method().clone();
        let url = context.url().to_string();
        let failed = |status: Option<StatusCode>, body: Option<String>, error: Option<String>| {
            Error::from(ApiError::from_failed_exchange(FailedExchange {
                method: method.clone(),
                url: url.clone(),
                status,
                body,
                transport_error: error,
            }))
        };

        // Nothing was dispatched, so nothing is recorded.
        if cancel.is_cancelled() {
            return Err(failed(None, None, Some(TransportFailure::Cancelled.to_string())));
        }

        context.begin();

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportFailure::Cancelled),
            received = receive(&self.http, request) => received,
        };

        match received {
            Ok(raw) if raw.status.is_success() => {
                context.settle(Outcome::Success {
                    status: raw.status,
                    content_length: raw.content_length,
                });
                let request_id = context.request_id().map(str::to_string);
                Ok(Response::from_body(raw.body, raw.status, raw.headers, request_id))
            }
            Ok(raw) => {
                context.settle(Outcome::Failure {
                    status: Some(raw.status),
                    error: format!("HTTP {}", raw.status),
                });
                Err(failed(Some(raw.status), Some(raw.body), None))
            }
            Err(failure) => {
                let message = failure.to_string();
                context.settle(Outcome::Failure {
                    status: None,
                    error: message.clone(),
                });
                Err(failed(None, None, Some(message)))
            }
        }
    }
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    content_length: Option<u64>,
    body: String,
}

#[derive(thiserror::Error, Debug)]
enum TransportFailure {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("{}", describe(.0))]
    Request(reqwest::Error),

    // Status line received, body not. Still reported with status 0.
    #[error("failed to read response body after HTTP {status}: {}", describe(.source))]
    Body {
        status: StatusCode,
        source: reqwest::Error,
    },
}

impl From<reqwest::Error> for TransportFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportFailure::Timeout
        } else {
            TransportFailure::Request(e)
        }
    }
}

async fn receive(
    http: &reqwest::Client,
    request: reqwest::Request,
) -> std::result::Result<RawResponse, TransportFailure> {
    let response = http.execute(request).await?;

    let status = response.status();
    let headers = response.headers().clone();
    let content_length = response.content_length();

    let body = response
        .text()
        .await
        .map_err(|source| match TransportFailure::from(source) {
            TransportFailure::Request(source) => TransportFailure::Body { status, source },
            other => other,
        })?;

    Ok(RawResponse {
        status,
        headers,
        content_length,
        body,
    })
}

// reqwest's top-level message omits the cause ("error sending request for
// url ..."), so the source chain is appended.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
