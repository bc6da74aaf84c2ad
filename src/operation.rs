//! Operation descriptors and the operation registry.
//!
//! Each remote operation is described by an [`OperationSpec`]: its method,
//! path template and parameters. Binding a JSON input against a spec yields a
//! [`RequestMetadata`] ready for the transport.
//!
//! ```
//! use opcall::{OperationRegistry, OperationSpec, ParamKind, ParamSpec};
//! use http::Method;
//! use serde_json::json;
//!
//! # fn example() -> Result<(), opcall::Error> {
//! let registry = OperationRegistry::new([
//!     OperationSpec::new("getStock", Method::GET, "/product/{sku}/stock/{includeSplit}")
//!         .param(ParamSpec::path("sku", ParamKind::String))
//!         .param(ParamSpec::path("includeSplit", ParamKind::Boolean)),
//! ])?;
//!
//! let spec = registry.get("getStock").unwrap();
//! let metadata = spec.bind(Some(json!({"sku": "ABC", "includeSplit": true})))?;
//! assert_eq!(metadata.path, "/product/ABC/stock/true");
//! # Ok(())
//! # }
//! ```

use crate::metadata::RequestMetadata;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat};
use http::{HeaderName, HeaderValue, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Input key holding the request body.
pub const BODY_KEY: &str = "body";

/// Where a parameter is placed in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    /// Substituted into a `{name}` placeholder of the path template.
    Path,
    /// Appended as a query parameter.
    Query,
    /// Sent as a request header.
    Header,
}

/// How a parameter value is rendered as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    /// Any scalar, rendered as-is.
    #[default]
    String,
    /// Integral number.
    Integer,
    /// Any finite number.
    Number,
    /// Rendered as lowercase `true` / `false`.
    Boolean,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// RFC 3339 timestamp, rendered with an explicit numeric offset.
    DateTime,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Date => "date",
            ParamKind::DateTime => "date-time",
        };
        f.write_str(name)
    }
}

impl ParamKind {
    /// Renders a JSON scalar as parameter text.
    ///
    /// Timestamps always carry a numeric offset (`Z` becomes `+00:00`) and
    /// booleans are lowercase.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value does not fit this kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use opcall::ParamKind;
    /// use serde_json::json;
    ///
    /// assert_eq!(
    ///     ParamKind::DateTime.format(&json!("2024-12-31T23:59:58Z")).unwrap(),
    ///     "2024-12-31T23:59:58+00:00"
    /// );
    /// assert_eq!(ParamKind::Boolean.format(&json!(false)).unwrap(), "false");
    /// ```
    pub fn format(self, value: &Value) -> std::result::Result<String, String> {
        let mismatch = || format!("expected a {} value, got {}", self, json_type(value));

        match (self, value) {
            (_, Value::Object(_) | Value::Array(_) | Value::Null) => Err(mismatch()),

            (ParamKind::String, Value::String(s)) => Ok(s.clone()),
            (ParamKind::String, Value::Number(n)) => Ok(n.to_string()),
            (ParamKind::String, Value::Bool(b)) => Ok(b.to_string()),

            (ParamKind::Boolean, Value::Bool(b)) => Ok(b.to_string()),
            (ParamKind::Boolean, Value::String(s)) => match s.trim() {
                t if t.eq_ignore_ascii_case("true") => Ok("true".to_string()),
                t if t.eq_ignore_ascii_case("false") => Ok("false".to_string()),
                _ => Err(mismatch()),
            },

            (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            (ParamKind::Integer, Value::String(s)) if s.trim().parse::<i128>().is_ok() => {
                Ok(s.trim().to_string())
            }

            (ParamKind::Number, Value::Number(n)) => Ok(n.to_string()),
            (ParamKind::Number, Value::String(s))
                if s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false) =>
            {
                Ok(s.trim().to_string())
            }

            (ParamKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|date| date.format("%Y-%m-%d").to_string())
                .map_err(|e| format!("invalid date {s:?}: {e}")),

            (ParamKind::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, false))
                .map_err(|e| format!("invalid date-time {s:?}: {e}")),

            _ => Err(mismatch()),
        }
    }
}

/// A single operation parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamSpec {
    /// Parameter name, also the key looked up in the JSON input.
    pub name: String,
    /// Where the value goes.
    #[serde(rename = "in")]
    pub location: ParamLocation,
    /// How the value is rendered.
    #[serde(default, rename = "type")]
    pub kind: ParamKind,
    /// Whether the input must supply it. Path parameters are always required.
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, location: ParamLocation, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            location,
            kind,
            required: location == ParamLocation::Path,
        }
    }

    /// A path parameter.
    pub fn path(name: impl Into<String>, kind: ParamKind) -> Self {
        Self::new(name, ParamLocation::Path, kind)
    }

    /// An optional query parameter.
    pub fn query(name: impl Into<String>, kind: ParamKind) -> Self {
        Self::new(name, ParamLocation::Query, kind)
    }

    /// An optional header parameter.
    pub fn header(name: impl Into<String>, kind: ParamKind) -> Self {
        Self::new(name, ParamLocation::Header, kind)
    }

    /// Marks the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn is_required(&self) -> bool {
        self.required || self.location == ParamLocation::Path
    }
}

/// Request body expectations of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct BodySpec {
    /// Whether the input must contain a `body`.
    #[serde(default)]
    pub required: bool,
}

/// Describes one remote operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Unique operation id.
    pub operation_id: String,
    /// HTTP method.
    #[serde(deserialize_with = "deserialize_method")]
    pub method: Method,
    /// Path template, e.g. `/product/{sku}`.
    pub path: String,
    /// Parameters, in binding order.
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    /// Body expectations; `None` means the operation takes no body.
    #[serde(default)]
    pub body: Option<BodySpec>,
}

impl OperationSpec {
    /// Creates an operation with no parameters and no body.
    pub fn new(operation_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            method,
            path: path.into(),
            parameters: Vec::new(),
            body: None,
        }
    }

    /// Adds a parameter.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    /// Declares a JSON request body.
    pub fn body(mut self, required: bool) -> Self {
        self.body = Some(BodySpec { required });
        self
    }

    /// Binds a JSON input to this operation.
    ///
    /// `None` and `null` mean "no parameters". Parameters are read from the
    /// top-level keys of the input object and the body from its `body` key;
    /// other keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if the input is not an object, a
    /// required parameter or body is missing, or a value does not fit its
    /// parameter kind.
    pub fn bind(&self, input: Option<Value>) -> Result<RequestMetadata> {
        let mut fields = match input {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(Error::malformed(
                    &self.operation_id,
                    format!("input must be a JSON object, got {}", json_type(&other)),
                ))
            }
        };

        let mut segments: HashMap<&str, String> = HashMap::new();
        let mut metadata = RequestMetadata::new(self.method.clone(), String::new());

        for param in &self.parameters {
            let value = match fields.remove(&param.name) {
                None | Some(Value::Null) if param.is_required() => {
                    return Err(Error::malformed(
                        &self.operation_id,
                        format!("missing required parameter {:?}", param.name),
                    ));
                }
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            match param.location {
                ParamLocation::Path => {
                    let text = self.format_param(param, &value)?;
                    segments.insert(&param.name, encode_segment(&text));
                }
                ParamLocation::Query => {
                    let items = match value {
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    for item in items.iter().filter(|item| !item.is_null()) {
                        let text = self.format_param(param, item)?;
                        metadata.query_params.push((param.name.clone(), text));
                    }
                }
                ParamLocation::Header => {
                    let text = self.format_param(param, &value)?;
                    let invalid = |e: &dyn fmt::Display| {
                        Error::malformed(
                            &self.operation_id,
                            format!("header {:?}: {e}", param.name),
                        )
                    };
                    let name =
                        HeaderName::try_from(param.name.as_str()).map_err(|e| invalid(&e))?;
                    let value = HeaderValue::try_from(text).map_err(|e| invalid(&e))?;
                    metadata.headers.insert(name, value);
                }
            }
        }

        let body = fields.remove(BODY_KEY).filter(|body| !body.is_null());
        match (&self.body, body) {
            (Some(spec), None) if spec.required => {
                return Err(Error::malformed(&self.operation_id, "missing required body"));
            }
            (Some(_), body) => metadata.body = body,
            (None, Some(_)) => {
                tracing::debug!(
                    operation = %self.operation_id,
                    "Ignoring body for operation without one"
                );
            }
            (None, None) => {}
        }

        metadata.path = render_path(&self.path, &segments);
        Ok(metadata)
    }

    fn format_param(&self, param: &ParamSpec, value: &Value) -> Result<String> {
        param.kind.format(value).map_err(|reason| {
            Error::malformed(
                &self.operation_id,
                format!("parameter {:?}: {reason}", param.name),
            )
        })
    }

    fn validate(&self) -> Result<()> {
        let declared: HashSet<&str> = self
            .parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Path)
            .map(|p| p.name.as_str())
            .collect();
        let placeholders: HashSet<&str> = placeholders(&self.path).collect();

        if let Some(missing) = placeholders.difference(&declared).next() {
            return Err(Error::ConfigurationError(format!(
                "operation {}: placeholder {{{missing}}} has no path parameter",
                self.operation_id
            )));
        }
        if let Some(unused) = declared.difference(&placeholders).next() {
            return Err(Error::ConfigurationError(format!(
                "operation {}: path parameter {unused:?} does not appear in {}",
                self.operation_id, self.path
            )));
        }
        Ok(())
    }
}

/// Read-only mapping from operation id to [`OperationSpec`].
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationSpec>,
}

impl OperationRegistry {
    /// Builds a registry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate ids or path templates that
    /// disagree with their path parameters.
    pub fn new(specs: impl IntoIterator<Item = OperationSpec>) -> Result<Self> {
        let mut operations = HashMap::new();
        for mut spec in specs {
            for param in &mut spec.parameters {
                param.required = param.is_required();
            }
            spec.validate()?;
            if operations.contains_key(&spec.operation_id) {
                return Err(Error::ConfigurationError(format!(
                    "duplicate operation id {}",
                    spec.operation_id
                )));
            }
            operations.insert(spec.operation_id.clone(), spec);
        }
        Ok(Self { operations })
    }

    /// Loads a registry from a JSON array of operation descriptors.
    ///
    /// ```
    /// use opcall::OperationRegistry;
    ///
    /// let registry = OperationRegistry::from_json(r#"[
    ///     {"operationId": "getHealth", "method": "GET", "path": "/health"}
    /// ]"#).unwrap();
    /// assert!(registry.get("getHealth").is_some());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the JSON is invalid or the
    /// descriptors are inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: Vec<OperationSpec> = serde_json::from_str(json)
            .map_err(|e| Error::ConfigurationError(format!("Invalid operation descriptors: {e}")))?;
        Self::new(specs)
    }

    /// Looks up an operation by id.
    pub fn get(&self, operation_id: &str) -> Option<&OperationSpec> {
        self.operations.get(operation_id)
    }

    /// All operation ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if the registry holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    template
        .split('{')
        .skip(1)
        .filter_map(|rest| rest.split_once('}').map(|(name, _)| name))
}

// Characters that cannot appear raw inside a single path segment. `:` and
// `+` stay literal so date-time offsets read as `+00:00`.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

// Single pass over the template, so a substituted value is never rescanned
// for placeholders.
fn render_path(template: &str, segments: &HashMap<&str, String>) -> String {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            break;
        };
        path.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        match segments.get(name) {
            Some(value) => path.push_str(value),
            None => path.push_str(&rest[open..=close]),
        }
        rest = &rest[close + 1..];
    }
    path.push_str(rest);
    path
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn deserialize_method<'de, D>(deserializer: D) -> std::result::Result<Method, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .map_err(serde::de::Error::custom)
}
