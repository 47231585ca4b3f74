use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::ChunkStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool definition exposed to callers.
///
/// Built once by a registry at setup time and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    /// Roles allowed to see this tool. Empty = unrestricted.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            roles: BTreeSet::new(),
            streaming: false,
        }
    }

    pub fn param(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Whether a caller acting as `role` may see this tool.
    pub fn allows_role(&self, role: &str) -> bool {
        self.roles.is_empty() || self.roles.contains(role)
    }
}

/// A single declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "ParamConstraints::is_empty")]
    pub constraints: ParamConstraints,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            constraints: ParamConstraints::default(),
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, default: Value) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: Some(default),
            constraints: ParamConstraints::default(),
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.constraints.minimum = Some(minimum);
        self.constraints.maximum = Some(maximum);
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.constraints.enum_values = Some(values);
        self
    }
}

/// Semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Path,
}

impl ParamType {
    /// Whether `value` has this type. Paths are strings.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String | ParamType::Path => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// JSON type name of `value`, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamConstraints {
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
}

impl ParamConstraints {
    pub fn is_empty(&self) -> bool {
        self.enum_values.is_none() && self.minimum.is_none() && self.maximum.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool invocation produces.
pub enum ToolOutput {
    /// A complete result from a plain tool.
    Full(Value),
    /// A lazy chunk sequence from a streaming tool.
    Stream(ChunkStream),
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Full(value) => f.debug_tuple("Full").field(value).finish(),
            ToolOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Errors a registry reports for a single invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool backend unavailable: {0}")]
    Unavailable(String),
}

impl From<ToolError> for crate::error::Error {
    fn from(e: ToolError) -> Self {
        crate::error::Error::Tool(e.to_string())
    }
}

/// The seam between the transport/gateway core and whatever provides tools.
///
/// The core only lists descriptors and invokes by name; argument
/// validation and schema concerns belong to the implementation.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;

    /// Look up a single descriptor by name.
    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.list_tools().into_iter().find(|t| t.name == name)
    }

    /// Descriptors visible to `role` (all of them when `role` is `None`).
    fn tools_for_role(&self, role: Option<&str>) -> Vec<ToolDescriptor> {
        let tools = self.list_tools();
        match role {
            Some(role) => tools.into_iter().filter(|t| t.allows_role(role)).collect(),
            None => tools,
        }
    }
}
