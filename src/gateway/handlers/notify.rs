use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::warn;

use super::super::AppState;

/// `POST /notify/:event_type`: relay a CLI hook event to the chat.
pub(crate) async fn notify(
    Path(event_type): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.bridge.notify(&event_type).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            warn!(event = %event_type, error = %e, "notification failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
