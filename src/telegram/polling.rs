//! Long-polling update loop, used when no public webhook URL is available.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TelegramClient;
use crate::chat::InboundHandler;

/// Seconds Telegram holds each `getUpdates` call open.
pub const POLL_TIMEOUT_SECS: u64 = 30;
/// Pause after a failed poll.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Spawn the poll loop.  Each update is handled on its own task so a long
/// running prompt never blocks `/cancel` from arriving.
pub fn spawn_polling(
    client: Arc<TelegramClient>,
    handler: Arc<dyn InboundHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("polling for updates");
        let mut offset: i64 = 0;
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                r = client.get_updates(offset, POLL_TIMEOUT_SECS) => r,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let update_id = update.update_id;
                        match update.into_inbound() {
                            Some(event) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move { handler.handle(event).await });
                            }
                            None => debug!(update_id, "ignoring unsupported update"),
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "polling error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("polling stopped");
    })
}
