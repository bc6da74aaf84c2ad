//! Response wrapper that preserves both parsed data and raw response details.

use http::{HeaderMap, StatusCode};
use serde_json::Value;

/// A successful (2xx) HTTP response.
///
/// # Examples
///
/// ```no_run
/// use opcall::{ApiClient, RequestMetadata};
/// use http::Method;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(client: ApiClient) -> Result<(), opcall::Error> {
/// let metadata = RequestMetadata::new(Method::GET, "/health");
/// let response = client.call(metadata, &CancellationToken::new()).await?;
///
/// println!("Status: {}", response.status);
/// println!("Body: {}", response.raw_body);
/// if let Some(id) = &response.request_id {
///     println!("Correlation id: {id}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The parsed response data.
    pub data: T,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Correlation id of the request, when it was instrumented.
    pub request_id: Option<String>,
}

impl Response<Value> {
    /// Interprets a raw success body as JSON.
    ///
    /// An empty body becomes `null` and a body that is not JSON is kept as a
    /// JSON string.
    pub fn from_body(
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        request_id: Option<String>,
    ) -> Self {
        let data = if raw_body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw_body).unwrap_or_else(|_| Value::String(raw_body.clone()))
        };
        Self {
            data,
            raw_body,
            status,
            headers,
            request_id,
        }
    }
}
