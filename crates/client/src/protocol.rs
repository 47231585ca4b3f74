//! JSON-RPC 2.0 types for the stdio wire protocol.
//!
//! Each message is a single line of JSON (newline-delimited).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use th_domain::resource::{ResourceContent, ResourceDescriptor};
use th_domain::settings::ServerParameter;
use th_domain::tool::ToolDescriptor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A correlation id: the wire allows either a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    /// Canonical text form used to match responses to waiters, so that a
    /// peer answering `42` resolves the request sent as `"42"`.
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::Text(s) => s.clone(),
        }
    }

    /// Extract and canonicalise the `id` field of a raw message.
    ///
    /// Returns `None` for messages without an id (notifications) or with a
    /// null / non-scalar id.
    pub fn key_of(message: &Value) -> Option<String> {
        match message.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id`, expects a response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(default = "d_jsonrpc")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: d_jsonrpc(),
            id,
            method: method.into(),
            params,
        }
    }
}

fn d_jsonrpc() -> String {
    "2.0".into()
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 response.
///
/// `id` is `None` only for the parse-error reply to a line whose id could
/// not be read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default = "d_jsonrpc")]
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: d_jsonrpc(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: d_jsonrpc(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if the response represents an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extract the result value, returning an error if the response is an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const TOOL_ERROR: i64 = -32000;
    pub const CONFIG_ERROR: i64 = -32001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The `data.kind` tag a toolhost server attaches to tool and resource errors.
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }

    /// The `data.detail` text, falling back to the message.
    pub fn detail(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|d| d.get("detail"))
            .and_then(Value::as_str)
            .unwrap_or(&self.message)
    }
}

/// `data.kind` values for `tools/call` errors. `-32602` covers both an
/// unknown tool and bad arguments; the kind tells them apart.
pub const KIND_NOT_FOUND: &str = "not_found";
pub const KIND_INVALID_ARGUMENTS: &str = "invalid_arguments";
pub const KIND_EXECUTION: &str = "execution";
pub const KIND_UNAVAILABLE: &str = "unavailable";

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Method payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_CONFIG_GET: &str = "config/get";
pub const METHOD_CONFIG_SET: &str = "config/set";
pub const METHOD_CONFIG_UPDATE: &str = "config/update";
pub const METHOD_CONFIG_PARAMETERS: &str = "config/parameters";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
pub const METHOD_RESOURCES_READ: &str = "resources/read";

/// Server info returned by `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Parameters for `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The result payload from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default = "empty_params")]
    pub arguments: Value,
}

/// Parameters for `config/get`. Without a key the whole record is returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigGetParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Parameters for `config/set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSetParams {
    pub key: String,
    pub value: Value,
}

/// Parameters for `config/update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateParams {
    pub values: serde_json::Map<String, Value>,
}

/// The result payload from `config/parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigParametersResult {
    pub parameters: Vec<ServerParameter>,
}

/// The result payload from `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    pub resources: Vec<ResourceDescriptor>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadParams {
    pub uri: String,
}

/// The result payload from `resources/read`: always a single entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadResult {
    pub contents: Vec<ResourceContent>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request_is_single_line() {
        let req = JsonRpcRequest::new(
            RequestId::Text("7".into()),
            METHOD_TOOLS_CALL,
            serde_json::json!({ "name": "echo", "arguments": { "text": "a\nb" } }),
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":\"7\""));
        assert!(json.contains("\"method\":\"tools/call\""));
    }

    #[test]
    fn id_key_canonicalises_numbers_and_strings() {
        let numeric = serde_json::json!({ "id": 42, "result": 1 });
        let text = serde_json::json!({ "id": "42", "result": 1 });
        assert_eq!(RequestId::key_of(&numeric).as_deref(), Some("42"));
        assert_eq!(RequestId::key_of(&text).as_deref(), Some("42"));
        assert_eq!(RequestId::Number(42).key(), RequestId::Text("42".into()).key());
    }

    #[test]
    fn id_key_ignores_notifications_and_null() {
        let notif = serde_json::json!({ "method": "notifications/progress" });
        let null_id = serde_json::json!({ "id": null, "error": { "code": -32700, "message": "x" } });
        assert!(RequestId::key_of(&notif).is_none());
        assert!(RequestId::key_of(&null_id).is_none());
    }

    #[test]
    fn deserialize_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.is_error());
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(format!("{err}"), "JSON-RPC error -32601: Method not found");
    }

    #[test]
    fn response_without_jsonrpc_field_still_parses() {
        let raw = r#"{"id":3,"result":{"ok":true}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id, Some(RequestId::Number(3)));
        assert_eq!(resp.into_result().unwrap()["ok"], true);
    }

    #[test]
    fn parse_error_reply_has_null_id() {
        let resp = JsonRpcResponse::failure(None, JsonRpcError::new(JsonRpcError::PARSE_ERROR, "bad"));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["id"].is_null());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn request_without_params_defaults_to_empty_object() {
        let raw = r#"{"id":1,"method":"tools/list"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.params, serde_json::json!({}));
        assert_eq!(req.jsonrpc, "2.0");
    }
}
