use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

use super::super::AppState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TestMessage {
    #[serde(default)]
    text: String,
}

/// `POST /test`: run `text` as if the authorized chat had sent it, and
/// wait for it to finish.
pub(crate) async fn inject_message(
    State(state): State<AppState>,
    body: Option<Json<TestMessage>>,
) -> impl IntoResponse {
    let text = body.map(|Json(b)| b.text).unwrap_or_default();
    if text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "No text provided" })),
        )
            .into_response();
    }

    let chat_id = state.bridge.settings().chat_id.clone();
    state.bridge.handle_message(&chat_id, &text).await;
    Json(serde_json::json!({ "ok": true, "text": text })).into_response()
}
