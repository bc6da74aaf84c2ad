//! Authentication header providers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};

/// Environment variables checked, in order, for the Basic auth username.
pub const USERNAME_VARS: [&str; 2] = ["USERNAME", "API_USERNAME"];
/// Environment variables checked, in order, for the Basic auth password.
pub const PASSWORD_VARS: [&str; 2] = ["PASSWORD", "API_PASSWORD"];

/// Supplies headers attached to every request.
///
/// Authentication headers are applied after the client's default headers, so
/// a provider can override a default header with the same name.
///
/// # Examples
///
/// ```
/// use opcall::AuthHeaderProvider;
/// use http::{HeaderMap, HeaderValue};
///
/// struct BearerToken(String);
///
/// impl AuthHeaderProvider for BearerToken {
///     fn auth_headers(&self) -> HeaderMap {
///         let mut headers = HeaderMap::new();
///         if let Ok(value) = HeaderValue::try_from(format!("Bearer {}", self.0)) {
///             headers.insert(http::header::AUTHORIZATION, value);
///         }
///         headers
///     }
/// }
/// ```
pub trait AuthHeaderProvider: Send + Sync {
    /// Returns the headers to attach to the next request.
    fn auth_headers(&self) -> HeaderMap;
}

/// Provider that attaches no headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthHeaderProvider for NoAuth {
    fn auth_headers(&self) -> HeaderMap {
        HeaderMap::new()
    }
}

/// HTTP Basic authentication.
///
/// Credentials are checked once at construction. When either is missing the
/// provider is disabled: it logs a single warning and never emits an
/// `Authorization` header.
#[derive(Debug, Clone)]
pub struct BasicAuthProvider {
    header: Option<HeaderValue>,
}

impl BasicAuthProvider {
    /// Creates a provider from explicit credentials.
    ///
    /// Blank credentials produce a disabled provider.
    pub fn new(username: &str, password: &str) -> Self {
        if username.trim().is_empty() || password.trim().is_empty() {
            tracing::warn!(
                "Basic auth credentials missing. Set USERNAME & PASSWORD (or API_USERNAME & API_PASSWORD) environment variables. No Authorization header will be sent."
            );
            return Self::disabled();
        }

        let encoded = STANDARD.encode(format!("{username}:{password}"));
        match HeaderValue::try_from(format!("Basic {encoded}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Self {
                    header: Some(value),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Basic auth header could not be encoded");
                Self::disabled()
            }
        }
    }

    /// Reads credentials from `USERNAME`/`PASSWORD`, falling back to
    /// `API_USERNAME`/`API_PASSWORD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads credentials through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(*name).filter(|v| !v.trim().is_empty()))
                .unwrap_or_default()
        };
        Self::new(&first(&USERNAME_VARS), &first(&PASSWORD_VARS))
    }

    /// A provider that never emits an `Authorization` header.
    pub fn disabled() -> Self {
        Self { header: None }
    }

    /// Returns `true` if credentials were available.
    pub fn is_enabled(&self) -> bool {
        self.header.is_some()
    }
}

impl AuthHeaderProvider for BasicAuthProvider {
    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = &self.header {
            headers.insert(AUTHORIZATION, value.clone());
        }
        headers
    }
}
