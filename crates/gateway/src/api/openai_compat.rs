//! OpenAI-compatible streaming tool calls.
//!
//! Tool output is re-encoded as `chat.completion.chunk` deltas so any
//! client that consumes OpenAI streaming completions can consume tools.
//!
//! - `POST /sse/openai/tool/call`: JSON body `{tool_name, arguments}`
//! - `GET  /sse/openai/tool/call?tool_name=..&arguments=<json>`
//!
//! Both are also mounted under `/mcp/`.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;

use th_domain::tool::ToolError;

use crate::api::sse::{into_sse, tool_call_frames};
use crate::api::tools::ToolCallRequest;
use crate::state::AppState;
use crate::stream::{error_frames, InvokeMode};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn tool_call(
    State(state): State<AppState>,
    Json(req): Json<ToolCallRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames =
        tool_call_frames(&state, &req.tool_name, req.arguments, InvokeMode::OpenAiDeltas).await;
    into_sse(frames)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ToolCallQuery {
    pub tool_name: String,
    /// JSON-encoded arguments object; absent means `{}`.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Query-string variant for clients that can only open an `EventSource`.
pub async fn tool_call_query(
    State(state): State<AppState>,
    Query(query): Query<ToolCallQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = match parse_arguments(query.arguments.as_deref()) {
        Ok(arguments) => {
            tool_call_frames(&state, &query.tool_name, arguments, InvokeMode::OpenAiDeltas).await
        }
        Err(e) => error_frames(InvokeMode::OpenAiDeltas, &query.tool_name, &e),
    };
    into_sse(frames)
}

fn parse_arguments(raw: Option<&str>) -> Result<Value, ToolError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Object(Default::default())),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidArguments(format!("`arguments` is not valid JSON: {e}"))
        }),
    }
}
