//! Error types for operation dispatch and HTTP exchanges.
//!
//! Every failure surfaces to the caller as a single [`Error`]. HTTP-level and
//! transport-level failures are normalized into an [`ApiError`] that keeps the
//! status, the raw response body and a best-effort parsed problem payload.

use http::{Method, StatusCode};
use serde_json::Value;
use url::Url;

/// URL recorded on an [`ApiError`] when the request URL cannot be parsed.
pub const PLACEHOLDER_URL: &str = "http://localhost/";

/// The main error type returned by the client.
///
/// # Examples
///
/// ```no_run
/// use opcall::{ApiClient, Error};
///
/// # async fn example(client: ApiClient) {
/// match client.execute("getHealth", None).await {
///     Ok(value) => println!("{value}"),
///     Err(Error::Api(err)) => eprintln!("{}", err.detailed()),
///     Err(Error::UnknownOperation(id)) => eprintln!("no such operation: {id}"),
///     Err(e) => eprintln!("{e}"),
/// }
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested operation id is not present in the registry.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The JSON input could not be bound to the operation's parameters or body.
    ///
    /// Raised before any network call is attempted.
    #[error("Malformed input for operation {operation}: {reason}")]
    MalformedInput {
        /// The operation the input was meant for
        operation: String,
        /// What was wrong with the input
        reason: String,
    },

    /// A non-2xx response or a transport failure (connection, timeout, cancellation).
    #[error(transparent)]
    Api(Box<ApiError>),

    /// Invalid configuration was provided.
    ///
    /// This covers a missing base URL, invalid header names or values and
    /// inconsistent operation descriptors.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    pub(crate) fn malformed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns the structured API error, if this is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the HTTP status code for API errors.
    ///
    /// Transport failures report `Some(0)`; other error kinds report `None`.
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|err| err.status)
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(Box::new(err))
    }
}

/// A specialized `Result` type for client calls.
pub type Result<T> = std::result::Result<T, Error>;

/// A failed HTTP exchange, normalized from a reqwest error or a non-2xx response.
///
/// `status` and `body` are `None` when no response was ever received.
#[derive(Debug, Clone)]
pub struct FailedExchange {
    /// Method of the original request.
    pub method: Method,
    /// URL of the original request, as sent.
    pub url: String,
    /// Response status, if a response arrived.
    pub status: Option<StatusCode>,
    /// Raw response body, if it could be read.
    pub body: Option<String>,
    /// Transport-level error message, if the exchange failed below HTTP.
    pub transport_error: Option<String>,
}

/// A structured error for a failed HTTP exchange.
///
/// Constructing one never fails: a body that is not valid JSON leaves
/// [`problem`](ApiError::problem) empty and an unparsable URL is replaced by
/// [`PLACEHOLDER_URL`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("HTTP {status} {reason}")]
pub struct ApiError {
    /// HTTP status code, `0` when no response was received.
    pub status: u16,
    /// Reason phrase, or the transport error message when there was no response.
    pub reason: String,
    /// Raw response body (empty when unavailable).
    pub body: String,
    /// The body parsed as JSON, when it is JSON.
    pub problem: Option<Value>,
    /// Method of the failed request.
    pub method: Method,
    /// URL of the failed request.
    pub url: Url,
}

impl ApiError {
    /// Builds an `ApiError` from a failed exchange.
    ///
    /// # Examples
    ///
    /// ```
    /// use opcall::{ApiError, FailedExchange};
    /// use http::{Method, StatusCode};
    ///
    /// let err = ApiError::from_failed_exchange(FailedExchange {
    ///     method: Method::GET,
    ///     url: "https://api.test/health".to_string(),
    ///     status: Some(StatusCode::INTERNAL_SERVER_ERROR),
    ///     body: Some(r#"{"title":"Oops"}"#.to_string()),
    ///     transport_error: None,
    /// });
    ///
    /// assert_eq!(err.status, 500);
    /// assert_eq!(err.problem.unwrap()["title"], "Oops");
    /// ```
    pub fn from_failed_exchange(exchange: FailedExchange) -> Self {
        let status = exchange.status.map(|s| s.as_u16()).unwrap_or(0);

        let reason = match exchange.status {
            Some(code) => code.canonical_reason().unwrap_or_default().to_string(),
            None => exchange
                .transport_error
                .clone()
                .unwrap_or_else(|| "no response received".to_string()),
        };

        let body = exchange.body.unwrap_or_default();
        let problem = parse_problem(&body);

        let url = Url::parse(&exchange.url).unwrap_or_else(|_| placeholder_url());

        Self {
            status,
            reason,
            body,
            problem,
            method: exchange.method,
            url,
        }
    }

    /// Returns `true` if no HTTP response was received (connection failure,
    /// timeout or cancellation).
    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    /// Multi-line diagnostic with status, reason, method, URL and body.
    ///
    /// # Examples
    ///
    /// ```
    /// use opcall::{ApiError, FailedExchange};
    /// use http::{Method, StatusCode};
    ///
    /// let err = ApiError::from_failed_exchange(FailedExchange {
    ///     method: Method::GET,
    ///     url: "https://api.test/health".to_string(),
    ///     status: Some(StatusCode::IM_A_TEAPOT),
    ///     body: Some("{ }".to_string()),
    ///     transport_error: None,
    /// });
    ///
    /// let detail = err.detailed();
    /// assert!(detail.contains("418"));
    /// assert!(detail.contains("I'm a teapot"));
    /// assert!(detail.contains("/health"));
    /// ```
    pub fn detailed(&self) -> String {
        format!(
            "Status: {} ({})\nMethod: {}\nUrl: {}\nBody: {}",
            self.status, self.reason, self.method, self.url, self.body
        )
    }
}

impl From<FailedExchange> for ApiError {
    fn from(exchange: FailedExchange) -> Self {
        ApiError::from_failed_exchange(exchange)
    }
}

fn parse_problem(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn placeholder_url() -> Url {
    #[allow(clippy::expect_used)]
    Url::parse(PLACEHOLDER_URL).expect("placeholder URL is a valid absolute URL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exchange(status: Option<StatusCode>, body: Option<&str>) -> FailedExchange {
        FailedExchange {
            method: Method::GET,
            url: "https://api.test/health".to_string(),
            status,
            body: body.map(str::to_string),
            transport_error: None,
        }
    }

    #[test]
    fn test_json_body_becomes_problem() {
        let err = ApiError::from_failed_exchange(exchange(
            Some(StatusCode::INTERNAL_SERVER_ERROR),
            Some(r#"{"title":"Oops","detail":"fail"}"#),
        ));

        assert_eq!(err.status, 500);
        assert_eq!(err.reason, "Internal Server Error");
        assert_eq!(err.problem, Some(json!({"title": "Oops", "detail": "fail"})));
        assert_eq!(err.method, Method::GET);
        assert!(err.url.as_str().ends_with("/health"));
    }

    #[test]
    fn test_non_json_body_keeps_raw_text() {
        let err = ApiError::from_failed_exchange(exchange(
            Some(StatusCode::BAD_GATEWAY),
            Some("Internal Error"),
        ));

        assert_eq!(err.status, 502);
        assert_eq!(err.body, "Internal Error");
        assert!(err.problem.is_none());
    }

    #[test]
    fn test_empty_and_whitespace_bodies_have_no_problem() {
        for body in ["", "   \n"] {
            let err = ApiError::from_failed_exchange(exchange(
                Some(StatusCode::SERVICE_UNAVAILABLE),
                Some(body),
            ));
            assert!(err.problem.is_none());
            assert_eq!(err.body, body);
        }
    }

    #[test]
    fn test_transport_failure_uses_error_message() {
        let err = ApiError::from_failed_exchange(FailedExchange {
            transport_error: Some("connection refused".to_string()),
            ..exchange(None, None)
        });

        assert_eq!(err.status, 0);
        assert_eq!(err.reason, "connection refused");
        assert_eq!(err.body, "");
        assert!(err.problem.is_none());
        assert!(err.is_transport_failure());
    }

    #[test]
    fn test_unparsable_url_uses_placeholder() {
        let err = ApiError::from_failed_exchange(FailedExchange {
            url: "not a url".to_string(),
            ..exchange(Some(StatusCode::NOT_FOUND), Some(""))
        });

        assert_eq!(err.url.as_str(), PLACEHOLDER_URL);
    }

    #[test]
    fn test_display_and_error_accessors() {
        let err: Error = ApiError::from_failed_exchange(exchange(
            Some(StatusCode::NOT_FOUND),
            Some("missing"),
        ))
        .into();

        assert_eq!(err.to_string(), "HTTP 404 Not Found");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.api_error().map(|e| e.body.as_str()), Some("missing"));

        let unknown = Error::UnknownOperation("noSuchOp".to_string());
        assert_eq!(unknown.status(), None);
        assert!(unknown.api_error().is_none());
    }

    #[test]
    fn test_detailed_includes_body() {
        let err = ApiError::from_failed_exchange(exchange(
            Some(StatusCode::BAD_REQUEST),
            Some("bad field"),
        ));

        let detail = err.detailed();
        assert!(detail.starts_with("Status: 400 (Bad Request)"));
        assert!(detail.contains("Method: GET"));
        assert!(detail.contains("Url: https://api.test/health"));
        assert!(detail.ends_with("Body: bad field"));
    }
}
