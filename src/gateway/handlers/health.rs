use axum::{extract::State, response::IntoResponse, Json};

use super::super::AppState;

/// `GET /health`
pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.health())
}
