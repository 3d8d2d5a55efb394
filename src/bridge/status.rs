//! The animated "working on it" message shown while a prompt runs.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chat::{ChatTransport, MessageId, ParseMode};
use crate::markup::escape_html;

/// Verbs the CLI itself cycles through while thinking.
const SPINNER_VERBS: &[&str] = &[
    "Accomplishing", "Actioning", "Actualizing", "Baking", "Booping", "Brewing",
    "Calculating", "Cerebrating", "Channelling", "Churning", "Clauding", "Coalescing",
    "Cogitating", "Combobulating", "Computing", "Concocting", "Conjuring", "Considering",
    "Contemplating", "Cooking", "Crafting", "Creating", "Crunching", "Deciphering",
    "Deliberating", "Determining", "Discombobulating", "Divining", "Doing", "Effecting",
    "Elucidating", "Enchanting", "Envisioning", "Finagling", "Flibbertigibbeting",
    "Forging", "Forming", "Frolicking", "Generating", "Germinating", "Hatching",
    "Herding", "Honking", "Hustling", "Ideating", "Imagining", "Incubating", "Inferring",
    "Jiving", "Manifesting", "Marinating", "Meandering", "Moseying", "Mulling",
    "Mustering", "Musing", "Noodling", "Percolating", "Perusing", "Philosophising",
    "Pondering", "Pontificating", "Processing", "Puttering", "Puzzling", "Reticulating",
    "Ruminating", "Scheming", "Schlepping", "Shimmying", "Shucking", "Simmering",
    "Smooshing", "Spelunking", "Spinning", "Stewing", "Sussing", "Synthesizing",
    "Thinking", "Tinkering", "Transmuting", "Unfurling", "Unravelling", "Vibing",
    "Wandering", "Whirring", "Wibbling", "Wizarding", "Working", "Wrangling",
];

/// Characters of streamed assistant text shown under the spinner.
const PREVIEW_CHARS: usize = 300;

/// `✨ <i>Pondering...</i>` for new conversations, `🔄` when continuing.
pub fn status_line(continuing: bool) -> String {
    let verb = SPINNER_VERBS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Working");
    let icon = if continuing { "🔄" } else { "✨" };
    format!("{icon} <i>{verb}...</i>")
}

/// Status text with the tail of the latest streamed fragment, if any.
pub fn status_text(prefix: &str, continuing: bool, preview: Option<&str>) -> String {
    let mut text = format!("{prefix}{}", status_line(continuing));
    if let Some(p) = preview.map(str::trim).filter(|p| !p.is_empty()) {
        let count = p.chars().count();
        let tail: String = p.chars().skip(count.saturating_sub(PREVIEW_CHARS)).collect();
        let ellipsis = if count > PREVIEW_CHARS { "…" } else { "" };
        text.push_str(&format!("\n\n<i>{ellipsis}{}</i>", escape_html(&tail)));
    }
    text
}

/// Edit `message_id` every `interval` until `stop` fires.
///
/// Streamed text arriving on `partial` is shown under the spinner.  Edit
/// failures are ignored.  Callers must await the handle after cancelling
/// and before deleting the message.
#[allow(clippy::too_many_arguments)]
pub fn spawn_status_animation(
    transport: Arc<dyn ChatTransport>,
    chat_id: String,
    message_id: MessageId,
    continuing: bool,
    prefix: String,
    interval: Duration,
    mut partial: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut latest: Option<String> = None;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            while let Ok(fragment) = partial.try_recv() {
                latest = Some(fragment);
            }
            let text = status_text(&prefix, continuing, latest.as_deref());
            if let Err(e) = transport
                .edit_message(&chat_id, message_id, &text, ParseMode::Html)
                .await
            {
                debug!(error = %e, "status edit failed");
            }
        }
    })
}
