use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /info`: identity of this instance.
pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let config_path = state
        .instance
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Json(serde_json::json!({
        "name": "toolhost",
        "version": env!("CARGO_PKG_VERSION"),
        "server": state.instance.server(),
        "instance": state.instance_label(),
        "config_path": config_path,
        "tool_count": state.registry.list_tools().len(),
        "resource_count": state.resources.list_resources().len(),
        "upstream": state.upstream.is_some(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
