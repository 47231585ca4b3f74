//! `POST /sse/tool/call`: stream a tool's chunks as raw server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures_util::stream::{Stream, StreamExt};
use serde_json::Value;

use crate::api::tools::ToolCallRequest;
use crate::state::AppState;
use crate::stream::{self, FrameStream, GatewayOutput, InvokeMode};

pub async fn raw_tool_call(
    State(state): State<AppState>,
    Json(req): Json<ToolCallRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = tool_call_frames(&state, &req.tool_name, req.arguments, InvokeMode::RawEvents).await;
    into_sse(frames)
}

/// Invoke `tool` and produce the event sequence for `mode`.
///
/// Failures, including unknown tools and bad arguments, are reported in
/// band as an error frame followed by the mode's terminator.
pub(crate) async fn tool_call_frames(
    state: &AppState,
    tool: &str,
    arguments: Value,
    mode: InvokeMode,
) -> FrameStream {
    tracing::debug!(tool, ?mode, "streaming tool call");
    match stream::invoke(state.registry.as_ref(), tool, arguments, mode).await {
        Ok(GatewayOutput::FullResult(value)) => match mode {
            InvokeMode::OpenAiDeltas => {
                stream::openai_frames(stream::single_chunk(value), tool.to_owned())
            }
            InvokeMode::RawEvents | InvokeMode::Full => {
                stream::raw_frames(stream::single_chunk(value))
            }
        },
        Ok(GatewayOutput::RawEventStream(frames))
        | Ok(GatewayOutput::OpenAiDeltaStream(frames)) => frames,
        Err(e) => stream::error_frames(mode, tool, &e),
    }
}

pub(crate) fn into_sse(frames: FrameStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(frames.map(|frame| Ok::<_, Infallible>(frame.into_event())))
        .keep_alive(KeepAlive::default())
}
