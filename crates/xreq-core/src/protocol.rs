//! Wire envelopes exchanged between the page, the bridge and the relay channel.
//!
//! Three message families share these types:
//! - page → bridge: [`PageRequest`] (`source = "cross_request_page"`)
//! - bridge ↔ relay channel: [`ChannelMessage`] (tagged by `type`)
//! - bridge → page: [`PageResult`] (`source = "cross_request_content"`)
//!
//! Field names follow the camelCase JSON layout used on every hop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{ConfigPatch, RelayConfig};

/// Fixed name of the relay channel; connections under any other name are ignored.
pub const CHANNEL_NAME: &str = "cross_request-bridge";
/// `source` marker on envelopes posted by page scripts.
pub const PAGE_SOURCE: &str = "cross_request_page";
/// `source` marker on results posted back to the page by the bridge.
pub const CONTENT_SOURCE: &str = "cross_request_content";
/// `type` of a result message on the channel and on the page surface.
pub const FETCH_CALLBACK: &str = "fetch_callback";
/// Timeout stamped on envelopes by the page client when the caller sets none.
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 30_000;

/// HTTP verbs the relay will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method string is not one of [`Method::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// One file attached to a multipart body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    /// Form field name.
    pub field: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Multipart payload carried in the envelope's `data` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultipartData {
    pub multipart: Vec<FilePart>,
}

/// The `data` field of a request: either a multipart form built from file
/// inputs, or any JSON value (usually a string or an object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestData {
    Multipart(MultipartData),
    Value(serde_json::Value),
}

impl Default for RequestData {
    fn default() -> Self {
        RequestData::Value(serde_json::Value::String(String::new()))
    }
}

impl From<&str> for RequestData {
    fn from(s: &str) -> Self {
        RequestData::Value(serde_json::Value::String(s.to_string()))
    }
}

impl From<serde_json::Value> for RequestData {
    fn from(v: serde_json::Value) -> Self {
        RequestData::Value(v)
    }
}

fn default_method() -> String {
    Method::Get.as_str().to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_CLIENT_TIMEOUT_MS
}

/// A single request as built by the page client. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
///
/// Decoding accepts what page scripts commonly send: scalar header values and
/// ids are stringified, and a `null` timeout means the default.
pub struct RequestEnvelope {
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub case_id: Option<String>,
    /// Correlation id pairing this request with its result.
    pub request_id: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, deserialize_with = "lenient::header_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub data: RequestData,
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<String>,
    /// Caller-requested timeout in milliseconds.
    #[serde(default = "default_timeout", deserialize_with = "lenient::timeout")]
    pub timeout: u64,
}

/// Normalized HTTP response handed back to the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Flattened response headers (lower-case names).
    pub header: BTreeMap<String, String>,
    pub status: u16,
    pub status_text: String,
    /// Parsed JSON when the body is JSON, otherwise the raw text as a string.
    pub body: serde_json::Value,
}

/// Failure class reported to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Network,
    #[default]
    Other,
}

impl ErrorKind {
    pub fn is_other(&self) -> bool {
        matches!(self, ErrorKind::Other)
    }
}

/// Normalized failure handed back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Always `true`; lets page code tell errors from responses without the envelope.
    pub error: bool,
    pub message: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "ErrorKind::is_other")]
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Diagnostic trace, when the failing layer produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    /// An unclassified error with just a message.
    pub fn other(name: &str, message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            name: name.to_string(),
            kind: ErrorKind::Other,
            details: None,
            stack: None,
        }
    }
}

/// `res` of a result envelope: a response on success, an error payload otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Error(ErrorPayload),
    Response(ResponsePayload),
}

/// `{type:"fetch", nodeId, req}` on the relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchEnvelope {
    pub node_id: String,
    pub req: RequestEnvelope,
}

/// `{type:"fetch_callback", nodeId, requestId, success, res}` on the relay channel.
/// Produced exactly once per fetch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub node_id: String,
    pub request_id: String,
    pub success: bool,
    pub res: ResultPayload,
}

impl ResultEnvelope {
    pub fn ok(node_id: &str, request_id: &str, res: ResponsePayload) -> Self {
        Self {
            node_id: node_id.to_string(),
            request_id: request_id.to_string(),
            success: true,
            res: ResultPayload::Response(res),
        }
    }

    pub fn err(node_id: &str, request_id: &str, err: ErrorPayload) -> Self {
        Self {
            node_id: node_id.to_string(),
            request_id: request_id.to_string(),
            success: false,
            res: ResultPayload::Error(err),
        }
    }
}

impl ResultEnvelope {
    /// Error reply for a frame that names itself a `fetch` but does not
    /// decode. `None` when the frame is not a fetch or carries no readable
    /// `req.requestId` to answer to.
    pub fn for_undecodable(frame: &serde_json::Value, reason: &str) -> Option<Self> {
        if frame.get("type").and_then(|t| t.as_str()) != Some("fetch") {
            return None;
        }
        let request_id = frame.get("req")?.get("requestId")?.as_str()?;
        let node_id = frame.get("nodeId").and_then(|n| n.as_str()).unwrap_or_default();
        Some(Self::err(
            node_id,
            request_id,
            ErrorPayload::other("InvalidRequest", format!("malformed request: {reason}")),
        ))
    }
}

/// Messages carried on the relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    Fetch(FetchEnvelope),
    FetchCallback(ResultEnvelope),
    /// Settings surface: ask for the current config.
    GetConfig,
    Config { config: RelayConfig },
    /// Settings surface: validated partial update.
    UpdateConfig { config: ConfigPatch },
    ConfigUpdated {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Request posted by a page script onto the page messaging surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub source: String,
    pub node_id: String,
    pub req: RequestEnvelope,
}

impl PageRequest {
    pub fn new(node_id: &str, req: RequestEnvelope) -> Self {
        Self {
            source: PAGE_SOURCE.to_string(),
            node_id: node_id.to_string(),
            req,
        }
    }
}

/// Result posted by the bridge onto the page messaging surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub node_id: String,
    pub request_id: String,
    pub success: bool,
    pub res: ResultPayload,
}

impl PageResult {
    /// Re-tag a channel result with the given document marker.
    pub fn from_envelope(node_id: &str, env: ResultEnvelope) -> Self {
        Self {
            source: CONTENT_SOURCE.to_string(),
            kind: FETCH_CALLBACK.to_string(),
            node_id: node_id.to_string(),
            request_id: env.request_id,
            success: env.success,
            res: env.res,
        }
    }
}

mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn scalar_to_string(v: Value) -> Result<String, String> {
        match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(format!("expected a string, number or boolean, got {other}")),
        }
    }

    pub fn header_map<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
        let raw = Option::<BTreeMap<String, Value>>::deserialize(d)?.unwrap_or_default();
        raw.into_iter()
            .map(|(name, value)| {
                scalar_to_string(value)
                    .map(|v| (name.clone(), v))
                    .map_err(|e| D::Error::custom(format!("header {name}: {e}")))
            })
            .collect()
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            v => scalar_to_string(v).map(Some).map_err(D::Error::custom),
        }
    }

    pub fn timeout<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.unwrap_or_else(super::default_timeout))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
