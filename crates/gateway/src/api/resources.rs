//! Readable resources.
//!
//! - `GET /resources`               : descriptors
//! - `GET /resources/read?uri=<uri>`: one resource body

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use th_domain::resource::ResourceError;

use crate::state::AppState;

pub async fn list_resources(State(state): State<AppState>) -> impl IntoResponse {
    let resources = state.resources.list_resources();
    Json(serde_json::json!({
        "count": resources.len(),
        "resources": resources,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub uri: String,
}

pub async fn read_resource(
    State(state): State<AppState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    match state.resources.read_resource(&query.uri).await {
        Ok(content) => Json(serde_json::json!({
            "success": true,
            "uri": content.uri,
            "mime_type": content.mime_type,
            "text": content.text,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(uri = %query.uri, error = %e, "resource read failed");
            let status = match e {
                ResourceError::NotFound(_) => StatusCode::NOT_FOUND,
                ResourceError::InvalidUri(_) => StatusCode::BAD_REQUEST,
                ResourceError::Read(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ResourceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
