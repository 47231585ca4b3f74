pub mod config;
pub mod health;
pub mod openai_compat;
pub mod resources;
pub mod sse;
pub mod tools;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Layers (CORS, concurrency limit, tracing) are added by the caller so
/// tests can drive the bare router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Liveness / identity
        .route("/health", get(health::health))
        .route("/info", get(health::info))
        // Tools
        .route("/tools/list", get(tools::list_tools))
        .route("/tool/call", post(tools::call_tool))
        // Resources
        .route("/resources", get(resources::list_resources))
        .route("/resources/read", get(resources::read_resource))
        // Streaming
        .route("/sse/tool/call", post(sse::raw_tool_call))
        .route(
            "/sse/openai/tool/call",
            get(openai_compat::tool_call_query).post(openai_compat::tool_call),
        )
        .route(
            "/mcp/sse/openai/tool/call",
            get(openai_compat::tool_call_query).post(openai_compat::tool_call),
        )
        // Instance configuration
        .route("/config", get(config::get_config).post(config::update_config))
        .route("/config/parameters", get(config::list_parameters))
}
