use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::tool::ToolError;

/// A boxed async stream, used for incremental tool output.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The stream a streaming tool hands back to its caller.
///
/// Finite and not restartable: once it yields `None` (or an `Err`), the
/// consumer stops polling it.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ToolError>>;

/// One unit of incremental tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamChunk {
    /// A plain text fragment.
    Text(String),
    /// A structured delta object (anything JSON that isn't a bare string).
    Delta(serde_json::Value),
}

impl StreamChunk {
    /// The chunk's native wire representation: text as-is, deltas as JSON.
    pub fn to_wire(&self) -> String {
        match self {
            StreamChunk::Text(text) => text.clone(),
            StreamChunk::Delta(value) => value.to_string(),
        }
    }

    /// The text this chunk contributes to an aggregated result.
    ///
    /// A delta carrying a string `content` field contributes that field;
    /// any other delta contributes its JSON encoding.
    pub fn content(&self) -> String {
        match self {
            StreamChunk::Text(text) => text.clone(),
            StreamChunk::Delta(value) => match value.get("content") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => value.to_string(),
            },
        }
    }
}

impl From<String> for StreamChunk {
    fn from(text: String) -> Self {
        StreamChunk::Text(text)
    }
}

impl From<&str> for StreamChunk {
    fn from(text: &str) -> Self {
        StreamChunk::Text(text.to_owned())
    }
}
