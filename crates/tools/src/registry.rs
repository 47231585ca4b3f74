//! A [`ToolRegistry`] backed by async Rust functions.
//!
//! ```rust,ignore
//! let registry = FnRegistry::new()
//!     .tool(
//!         ToolDescriptor::new("add", "Add two numbers")
//!             .param(ToolParameter::required("a", ParamType::Number))
//!             .param(ToolParameter::required("b", ParamType::Number)),
//!         |args| async move { Ok(json!(args["a"].as_f64() + args["b"].as_f64())) },
//!     );
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use th_domain::stream::ChunkStream;
use th_domain::tool::{
    json_type_name, ToolDescriptor, ToolError, ToolOutput, ToolParameter, ToolRegistry,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<Result<ToolOutput, ToolError>> + Send + Sync>;

struct Entry {
    descriptor: ToolDescriptor,
    handler: Handler,
}

/// Explicit table of tools, in registration order.
#[derive(Default)]
pub struct FnRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl FnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain tool returning a complete result.
    pub fn tool<F, Fut>(self, descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args: Value| {
            let fut = handler(args);
            Box::pin(async move { fut.await.map(ToolOutput::Full) }) as BoxFuture<_>
        });
        self.insert(descriptor, handler)
    }

    /// Register a streaming tool. The descriptor is marked `streaming`.
    pub fn streaming_tool<F>(self, descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Result<ChunkStream, ToolError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |args: Value| {
            let out = handler(args).map(ToolOutput::Stream);
            Box::pin(async move { out }) as BoxFuture<_>
        });
        self.insert(descriptor.streaming(), handler)
    }

    fn insert(mut self, descriptor: ToolDescriptor, handler: Handler) -> Self {
        let name = descriptor.name.clone();
        let entry = Entry { descriptor, handler };
        match self.index.get(&name) {
            Some(&i) => {
                tracing::warn!(tool = %name, "tool registered twice, replacing earlier entry");
                self.entries[i] = entry;
            }
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for FnRegistry {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;

        let arguments = validate_arguments(&entry.descriptor, arguments)?;
        tracing::debug!(tool = name, streaming = entry.descriptor.streaming, "invoking tool");
        (entry.handler)(arguments).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check `arguments` against the descriptor and fill in defaults.
///
/// `null` counts as an empty object. Unknown keys pass through untouched.
pub fn validate_arguments(
    descriptor: &ToolDescriptor,
    arguments: Value,
) -> Result<Value, ToolError> {
    let mut args = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "arguments must be an object, got {}",
                json_type_name(&other)
            )))
        }
    };

    for param in &descriptor.parameters {
        match args.get(&param.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &param.default {
                    args.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required parameter `{}`",
                        param.name
                    )));
                }
            }
            Some(value) => check_param(param, value)?,
        }
    }

    Ok(Value::Object(args))
}

fn check_param(param: &ToolParameter, value: &Value) -> Result<(), ToolError> {
    if !param.param_type.accepts(value) {
        return Err(ToolError::InvalidArguments(format!(
            "parameter `{}` expects {:?}, got {}",
            param.name,
            param.param_type,
            json_type_name(value)
        )));
    }

    let c = &param.constraints;
    if let Some(allowed) = &c.enum_values {
        if !allowed.contains(value) {
            return Err(ToolError::InvalidArguments(format!(
                "parameter `{}` must be one of {}",
                param.name,
                Value::Array(allowed.clone())
            )));
        }
    }
    if let Some(n) = value.as_f64() {
        if c.minimum.is_some_and(|min| n < min as f64) || c.maximum.is_some_and(|max| n > max as f64) {
            return Err(ToolError::InvalidArguments(format!(
                "parameter `{}` out of range [{}, {}]",
                param.name,
                c.minimum.map_or("-inf".into(), |m| m.to_string()),
                c.maximum.map_or("inf".into(), |m| m.to_string()),
            )));
        }
    }
    Ok(())
}
