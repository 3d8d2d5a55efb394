use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{debug, warn};

use super::super::AppState;
use crate::chat::InboundHandler;
use crate::telegram::types::Update;

/// `POST <webhook_path>`: accept a Telegram update.
///
/// Telegram redelivers anything not acknowledged promptly, so the update is
/// handled on its own task and the reply goes out immediately.
pub(crate) async fn telegram_webhook(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let update: Update = match serde_json::from_value(body) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "malformed telegram update");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "ok": false, "error": "malformed update" })),
            )
                .into_response();
        }
    };

    let update_id = update.update_id;
    match update.into_inbound() {
        Some(event) => {
            let bridge = state.bridge.clone();
            tokio::spawn(async move { bridge.handle(event).await });
        }
        None => debug!(update_id, "ignoring unsupported update"),
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}
