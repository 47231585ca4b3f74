//! This instance's configuration record.
//!
//! - `GET  /config`           : current values
//! - `POST /config`           : merge `{values}` into the record
//! - `GET  /config/parameters`: declared settings
//!
//! Writes to declared settings are type-checked first; other keys pass
//! through unchecked.
//!
//! Writes go through the store, so change callbacks (e.g. the `list_dir`
//! root) fire exactly as they would for any other writer.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use th_config_store::{ConfigMap, ConfigStoreError};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConfigUpdateRequest {
    pub values: ConfigMap,
}

pub async fn get_config(State(state): State<AppState>) -> Response {
    match state.with_instance(|instance| instance.load()).await {
        Ok(Ok(values)) => record_response(&state, values),
        Ok(Err(e)) => store_error_response(&e),
        Err(e) => task_error_response(&e),
    }
}

pub async fn list_parameters(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "count": state.parameters.len(),
        "parameters": state.parameters.as_ref(),
    }))
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(req): Json<ConfigUpdateRequest>,
) -> Response {
    let keys: Vec<&String> = req.values.keys().collect();
    tracing::info!(instance = %state.instance_label(), ?keys, "updating configuration");
    if let Err(e) = state.check_settings(&req.values) {
        tracing::warn!(error = %e, "rejected configuration write");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            })),
        )
            .into_response();
    }
    let values = req.values;
    match state.with_instance(move |instance| instance.update(values)).await {
        Ok(Ok(values)) => record_response(&state, values),
        Ok(Err(e)) => store_error_response(&e),
        Err(e) => task_error_response(&e),
    }
}

fn record_response(state: &AppState, values: ConfigMap) -> Response {
    Json(serde_json::json!({
        "success": true,
        "server": state.instance.server(),
        "instance": state.instance_label(),
        "values": values,
    }))
    .into_response()
}

fn store_error_response(error: &ConfigStoreError) -> Response {
    tracing::warn!(error = %error, "configuration store error");
    let status = match error {
        ConfigStoreError::ParseFailure { .. } => StatusCode::CONFLICT,
        ConfigStoreError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        ConfigStoreError::WriteFailure { .. } | ConfigStoreError::ReadFailure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
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

fn task_error_response(error: &tokio::task::JoinError) -> Response {
    tracing::error!(error = %error, "configuration task failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": format!("configuration task failed: {error}"),
        })),
    )
        .into_response()
}
