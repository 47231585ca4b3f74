//! Tool listing and blocking invocation.
//!
//! - `GET  /tools/list?role=<r>`: descriptors visible to a role
//! - `POST /tool/call`          : invoke and return the complete result

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use th_domain::tool::ToolError;

use crate::state::AppState;
use crate::stream;

/// Body shared by every tool-call endpoint.
#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /tools/list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub role: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> impl IntoResponse {
    let tools = state.registry.tools_for_role(query.role.as_deref());
    Json(serde_json::json!({
        "count": tools.len(),
        "tools": tools,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /tool/call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invoke a tool and return `{success, result}`.
///
/// Streaming tools are drained and their content concatenated.
pub async fn call_tool(
    State(state): State<AppState>,
    Json(req): Json<ToolCallRequest>,
) -> Response {
    let start = std::time::Instant::now();
    match stream::invoke_full(state.registry.as_ref(), &req.tool_name, req.arguments).await {
        Ok(result) => {
            tracing::debug!(
                tool = %req.tool_name,
                duration_ms = start.elapsed().as_millis() as u64,
                "tool call completed"
            );
            Json(serde_json::json!({
                "success": true,
                "result": result,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(tool = %req.tool_name, error = %e, "tool call failed");
            tool_error_response(&e)
        }
    }
}

/// Map a [`ToolError`] to an HTTP status and `{success: false, error}` body.
pub(crate) fn tool_error_response(error: &ToolError) -> Response {
    let status = match error {
        ToolError::NotFound(_) => StatusCode::NOT_FOUND,
        ToolError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
        ToolError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ToolError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": error.to_string(),
        })),
    )
        .into_response()
}
