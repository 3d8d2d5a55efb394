//! HTTP surface of the relay.
//!
//! Serves:
//! - `POST <webhook_path>`: Telegram update delivery (secret-checked)
//! - `GET /health`: liveness plus session summary
//! - `POST /notify/:event_type`: lifecycle hooks from the Claude CLI
//! - `POST /test`: inject a message as if it came from the chat

mod auth;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bridge::Bridge;

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bridge: Arc<Bridge>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`, if one was registered.
    pub(crate) webhook_secret: Option<String>,
}

/// Build the router.  Split out so tests can drive it without a socket.
pub fn router(bridge: Arc<Bridge>, webhook_path: &str, webhook_secret: Option<String>) -> Router {
    let state = AppState {
        bridge,
        webhook_secret,
    };

    let webhook = Router::new()
        .route(webhook_path, post(handlers::webhook::telegram_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::webhook_secret_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/notify/:event_type", post(handlers::notify::notify))
        .route("/test", post(handlers::test::inject_message))
        .merge(webhook)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server on `addr`.
pub async fn start_gateway(
    addr: SocketAddr,
    bridge: Arc<Bridge>,
    webhook_path: &str,
    webhook_secret: Option<String>,
) -> std::io::Result<Gateway> {
    if webhook_secret.is_none() {
        warn!("webhook secret not configured; webhook requests are not authenticated");
    }
    let app = router(bridge, webhook_path, webhook_secret);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}
