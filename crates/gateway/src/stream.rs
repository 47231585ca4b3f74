//! Tool invocation in one of three output modes.
//!
//! - `Full`: plain tools return their value; streaming tools are returned
//!   as `FullResult` only by blocking callers that aggregate with
//!   [`collect_full_content`].
//! - `RawEvents`: one SSE `data:` frame per chunk, then `event: end`.
//! - `OpenAiDeltas`: OpenAI `chat.completion.chunk` frames, then `[DONE]`.
//!
//! Frames are plain [`SseFrame`] values; the HTTP layer turns them into
//! axum SSE events.

use axum::response::sse::Event;
use serde::Serialize;
use serde_json::{json, Value};

use futures_util::StreamExt;
use th_domain::stream::{BoxStream, ChunkStream, StreamChunk};
use th_domain::tool::{ToolError, ToolOutput, ToolRegistry};

/// Data payload of the raw-mode terminator frame.
pub const RAW_END: &str = "[END]";

/// Data payload of the OpenAI-mode terminator frame.
pub const OPENAI_DONE: &str = "[DONE]";

/// Error `type` reported inside OpenAI-mode error frames.
pub const TOOL_EXECUTION_ERROR: &str = "tool_execution_error";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Modes and outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    Full,
    RawEvents,
    OpenAiDeltas,
}

/// One server-sent event: an optional event name and its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
        }
    }

    /// Convert to an axum event.
    ///
    /// SSE treats `\r\n`, `\r` and `\n` alike as line terminators and axum
    /// only splits on `\n`, so carriage returns are folded into `\n` first.
    /// Each line then becomes its own `data:` field.
    pub fn into_event(self) -> Event {
        let event = Event::default().data(normalize_newlines(&self.data));
        match self.event {
            Some(name) => event.event(name),
            None => event,
        }
    }
}

fn normalize_newlines(data: &str) -> std::borrow::Cow<'_, str> {
    if data.contains('\r') {
        std::borrow::Cow::Owned(data.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        std::borrow::Cow::Borrowed(data)
    }
}

pub type FrameStream = BoxStream<'static, SseFrame>;

pub enum GatewayOutput {
    FullResult(Value),
    RawEventStream(FrameStream),
    OpenAiDeltaStream(FrameStream),
}

impl std::fmt::Debug for GatewayOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayOutput::FullResult(v) => f.debug_tuple("FullResult").field(v).finish(),
            GatewayOutput::RawEventStream(_) => f.write_str("RawEventStream(..)"),
            GatewayOutput::OpenAiDeltaStream(_) => f.write_str("OpenAiDeltaStream(..)"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invoke `tool` and shape its output for `mode`.
///
/// Plain tools yield `FullResult` in every mode. Streaming tools in
/// `Full` mode are aggregated; in the SSE modes the chunk stream is
/// re-encoded lazily and nothing is consumed until the caller polls.
pub async fn invoke(
    registry: &dyn ToolRegistry,
    tool: &str,
    arguments: Value,
    mode: InvokeMode,
) -> Result<GatewayOutput, ToolError> {
    let output = registry.invoke_tool(tool, arguments).await?;
    match (output, mode) {
        (ToolOutput::Full(value), _) => Ok(GatewayOutput::FullResult(value)),
        (ToolOutput::Stream(stream), InvokeMode::Full) => {
            let text = collect_full_content(stream).await?;
            Ok(GatewayOutput::FullResult(Value::String(text)))
        }
        (ToolOutput::Stream(stream), InvokeMode::RawEvents) => {
            Ok(GatewayOutput::RawEventStream(raw_frames(stream)))
        }
        (ToolOutput::Stream(stream), InvokeMode::OpenAiDeltas) => {
            Ok(GatewayOutput::OpenAiDeltaStream(openai_frames(stream, tool.to_owned())))
        }
    }
}

/// Invoke `tool` for a blocking caller: streaming output is aggregated.
pub async fn invoke_full(
    registry: &dyn ToolRegistry,
    tool: &str,
    arguments: Value,
) -> Result<Value, ToolError> {
    match registry.invoke_tool(tool, arguments).await? {
        ToolOutput::Full(value) => Ok(value),
        ToolOutput::Stream(stream) => collect_full_content(stream).await.map(Value::String),
    }
}

/// Concatenate every chunk's content in arrival order.
///
/// The first error aborts aggregation and is returned as-is.
pub async fn collect_full_content(mut stream: ChunkStream) -> Result<String, ToolError> {
    let mut content = String::new();
    while let Some(item) = stream.next().await {
        content.push_str(&item?.content());
    }
    Ok(content)
}

/// Wrap a complete value as a one-chunk stream, so SSE callers of plain
/// tools still receive a well-formed event sequence.
pub fn single_chunk(value: Value) -> ChunkStream {
    let chunk = match value {
        Value::String(text) => StreamChunk::Text(text),
        other => StreamChunk::Delta(other),
    };
    Box::pin(futures_util::stream::once(async move {
        Ok::<StreamChunk, ToolError>(chunk)
    }))
}

/// Event sequence for a call that failed before producing any chunk.
pub fn error_frames(mode: InvokeMode, tool: &str, error: &ToolError) -> FrameStream {
    let frames = match mode {
        InvokeMode::OpenAiDeltas => vec![
            SseFrame::data(openai_error(error)),
            SseFrame::data(OPENAI_DONE),
        ],
        InvokeMode::RawEvents | InvokeMode::Full => vec![
            SseFrame::named("error", raw_error(error)),
            SseFrame::named("end", RAW_END),
        ],
    };
    tracing::warn!(tool, error = %error, "tool call failed before streaming");
    Box::pin(futures_util::stream::iter(frames))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn raw_frames(mut stream: ChunkStream) -> FrameStream {
    Box::pin(async_stream::stream! {
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => yield SseFrame::data(chunk.to_wire()),
                Err(e) => {
                    tracing::warn!(error = %e, "tool stream failed");
                    yield SseFrame::named("error", raw_error(&e));
                    break;
                }
            }
        }
        yield SseFrame::named("end", RAW_END);
    })
}

fn raw_error(error: &ToolError) -> String {
    json!({ "error": error.to_string() }).to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct OpenAIChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<OpenAIChunkChoice>,
}

#[derive(Debug, Serialize)]
struct OpenAIChunkChoice {
    index: u32,
    delta: OpenAIChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct OpenAIChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

/// Builds the frames of one completion; every frame shares id and timestamp.
struct ChunkEncoder {
    id: String,
    created: i64,
    model: String,
}

impl ChunkEncoder {
    fn new(model: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model,
        }
    }

    fn frame(&self, delta: OpenAIChunkDelta, finish_reason: Option<&'static str>) -> SseFrame {
        let chunk = OpenAIChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAIChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        };
        // Serializing these plain structs cannot fail.
        SseFrame::data(serde_json::to_string(&chunk).unwrap_or_default())
    }

    fn role(&self) -> SseFrame {
        self.frame(
            OpenAIChunkDelta {
                role: Some("assistant"),
                content: None,
            },
            None,
        )
    }

    fn content(&self, text: String) -> SseFrame {
        self.frame(
            OpenAIChunkDelta {
                role: None,
                content: Some(text),
            },
            None,
        )
    }

    fn stop(&self) -> SseFrame {
        self.frame(
            OpenAIChunkDelta {
                role: None,
                content: None,
            },
            Some("stop"),
        )
    }
}

/// Re-encode a chunk stream as OpenAI streaming completion frames.
///
/// `model` is reported in every chunk; the gateway passes the tool name.
pub fn openai_frames(mut stream: ChunkStream, model: String) -> FrameStream {
    Box::pin(async_stream::stream! {
        let encoder = ChunkEncoder::new(model);
        yield encoder.role();

        let mut failed = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => yield encoder.content(chunk.content()),
                Err(e) => {
                    tracing::warn!(error = %e, "tool stream failed");
                    yield SseFrame::data(openai_error(&e));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            yield encoder.stop();
        }
        yield SseFrame::data(OPENAI_DONE);
    })
}

fn openai_error(error: &ToolError) -> String {
    json!({
        "error": {
            "message": error.to_string(),
            "type": TOOL_EXECUTION_ERROR,
        }
    })
    .to_string()
}
