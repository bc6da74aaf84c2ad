//! Operation id → HTTP request dispatch.
//!
//! The dispatcher resolves an operation id in the [`OperationRegistry`],
//! binds the JSON input into a [`RequestMetadata`] and hands it to a
//! [`Transport`]. It performs no retries.

use crate::metadata::RequestMetadata;
use crate::operation::OperationRegistry;
use crate::response::Response;
use crate::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes bound requests.
///
/// [`ApiClient`](crate::ApiClient) provides the HTTP implementation.
pub trait Transport: Send + Sync {
    /// Sends one request and returns the successful response.
    ///
    /// Non-2xx responses and transport failures are returned as
    /// [`Error::Api`].
    fn send(
        &self,
        metadata: RequestMetadata,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Response<Value>>> + Send;
}

/// Maps operation ids and JSON inputs to requests.
#[derive(Debug, Clone)]
pub struct OperationDispatcher {
    registry: Arc<OperationRegistry>,
}

impl OperationDispatcher {
    /// Creates a dispatcher over a registry.
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// All known operation ids, in no particular order.
    pub fn list_operations(&self) -> impl Iterator<Item = &str> {
        self.registry.ids()
    }

    /// Binds the input for an operation without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] or [`Error::MalformedInput`].
    pub fn prepare(&self, operation_id: &str, input: Option<Value>) -> Result<RequestMetadata> {
        let spec = self
            .registry
            .get(operation_id)
            .ok_or_else(|| Error::UnknownOperation(operation_id.to_string()))?;
        spec.bind(input)
    }

    /// Executes an operation and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] or [`Error::MalformedInput`]
    /// before any network call, and [`Error::Api`] for failed exchanges.
    pub async fn execute<T>(
        &self,
        transport: &T,
        operation_id: &str,
        input: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value>
    where
        T: Transport,
    {
        let metadata = self.prepare(operation_id, input)?;

        tracing::debug!(
            operation = operation_id,
            method = %metadata.method,
            path = %metadata.path,
            "Dispatching operation"
        );

        let response = transport.send(metadata, cancel).await?;
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationSpec, ParamKind, ParamSpec};
    use http::{HeaderMap, Method, StatusCode};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<RequestMetadata>>,
    }

    impl Transport for FakeTransport {
        async fn send(
            &self,
            metadata: RequestMetadata,
            _cancel: &CancellationToken,
        ) -> Result<Response<Value>> {
            self.sent.lock().unwrap().push(metadata);
            Ok(Response::from_body(
                r#"{"ok":true}"#.to_string(),
                StatusCode::OK,
                HeaderMap::new(),
                None,
            ))
        }
    }

    fn dispatcher() -> OperationDispatcher {
        let registry = OperationRegistry::new([
            OperationSpec::new("getHealth", Method::GET, "/health"),
            OperationSpec::new("getStock", Method::GET, "/product/{sku}/stock/{includeSplitStock}")
                .param(ParamSpec::path("sku", ParamKind::String))
                .param(ParamSpec::path("includeSplitStock", ParamKind::Boolean)),
        ])
        .unwrap();
        OperationDispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_list_operations() {
        let dispatcher = dispatcher();
        let mut ids: Vec<_> = dispatcher.list_operations().collect();
        ids.sort();
        assert_eq!(ids, ["getHealth", "getStock"]);
    }

    #[tokio::test]
    async fn test_execute_sends_bound_request() {
        let transport = FakeTransport::default();
        let result = dispatcher()
            .execute(
                &transport,
                "getStock",
                Some(json!({"sku": "ABC", "includeSplitStock": false})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].path, "/product/ABC/stock/false");
    }

    #[tokio::test]
    async fn test_unknown_operation_sends_nothing() {
        let transport = FakeTransport::default();
        let result = dispatcher()
            .execute(&transport, "noSuchOp", None, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::UnknownOperation(ref id)) if id == "noSuchOp"));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_sends_nothing() {
        let transport = FakeTransport::default();
        let result = dispatcher()
            .execute(&transport, "getStock", Some(json!({"sku": "ABC"})), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::MalformedInput { .. })));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
