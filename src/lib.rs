//! # opcall - an operation-indexed HTTP client
//!
//! `opcall` executes remote API operations by id. Given an operation id and
//! a JSON input it binds the input to the operation's path, query, header and
//! body parameters, builds the HTTP request, applies cross-cutting policies
//! (authentication, default headers, timeout, correlation ids, telemetry),
//! executes it, and maps any failure into a uniform, inspectable error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use opcall::{ApiClient, BasicAuthProvider, ClientConfig, OperationRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), opcall::Error> {
//!     let config = ClientConfig::from_env()?;
//!     let registry = OperationRegistry::from_json(r#"[
//!         {"operationId": "getHealth", "method": "GET", "path": "/health"},
//!         {
//!             "operationId": "getStock",
//!             "method": "GET",
//!             "path": "/product/{sku}/stock",
//!             "parameters": [{"name": "sku", "in": "path"}]
//!         }
//!     ]"#)?;
//!
//!     let client = ApiClient::new(config, registry, BasicAuthProvider::from_env())?;
//!
//!     let stock = client.execute("getStock", Some(r#"{"sku": "ABC"}"#)).await?;
//!     println!("{stock}");
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is an [`Error`]: an unknown operation id, input that does
//! not fit the operation, or an [`ApiError`] for non-2xx responses and
//! transport failures. An `ApiError` keeps the raw body and, when the body is
//! JSON, the parsed problem payload:
//!
//! ```no_run
//! use opcall::{ApiClient, Error};
//!
//! # async fn example(client: ApiClient) {
//! if let Err(Error::Api(err)) = client.execute("getHealth", None).await {
//!     eprintln!("{}", err.detailed());
//!     if let Some(problem) = &err.problem {
//!         eprintln!("title: {}", problem["title"]);
//!     }
//! }
//! # }
//! ```
//!
//! ## Instrumentation
//!
//! With [`ApiClient::set_verbose`] on, every request carries a random
//! `X-Request-Id` and emits `tracing` begin/end/error records with timing.
//! A [`TelemetrySink`] receives exactly one [`CompletionEvent`] or
//! [`FailureEvent`] per request that reaches the network.

mod auth;
mod client;
mod config;
mod dispatch;
mod error;
pub mod metadata;
mod operation;
pub mod request;
mod response;
pub mod telemetry;

pub use auth::{AuthHeaderProvider, BasicAuthProvider, NoAuth};
pub use client::ApiClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use dispatch::{OperationDispatcher, Transport};
pub use error::{ApiError, Error, FailedExchange, Result};
pub use metadata::RequestMetadata;
pub use operation::{
    BodySpec, OperationRegistry, OperationSpec, ParamKind, ParamLocation, ParamSpec,
};
pub use response::Response;
pub use telemetry::{CompletionEvent, FailureEvent, TelemetrySink};
