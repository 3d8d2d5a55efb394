//! Response formatting: chunking, option buttons, and send-with-fallback.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, warn};

use super::Bridge;
use crate::chat::{Button, Keyboard, ParseMode};
use crate::markup::{html_to_plain, markdown_to_telegram_html};

static NUMBERED_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\d+)[.)]\s+").unwrap_or_else(|e| panic!("option pattern: {e}")));

/// Most quick-reply buttons attached to one response.
const MAX_OPTION_BUTTONS: usize = 8;

/// Split `text` into pieces of at most `chunk_size` characters, breaking at
/// newlines where possible.  A single line longer than the limit is cut.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    // Whether `current` holds at least one line, possibly an empty one.
    let mut started = false;

    for mut line in text.split('\n') {
        let mut line_len = line.chars().count();

        while line_len > chunk_size {
            if started {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                started = false;
            }
            let cut = line
                .char_indices()
                .nth(chunk_size)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            chunks.push(line[..cut].to_string());
            line = &line[cut..];
            line_len -= chunk_size;
        }

        let sep = usize::from(started);
        if current_len + sep + line_len > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        } else {
            if started {
                current.push('\n');
            }
            current.push_str(line);
            current_len += sep + line_len;
        }
        started = true;
    }

    if started {
        chunks.push(current);
    }
    chunks
}

/// Numeric reply buttons when the text lists at least two numbered options
/// (`1.` or `1)` at line start).
pub fn detect_options(text: &str) -> Option<Keyboard> {
    let found: Vec<u64> = NUMBERED_OPTION
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if found.len() < 2 {
        return None;
    }

    let mut numbers = found;
    numbers.sort_unstable();
    numbers.dedup();
    numbers.truncate(MAX_OPTION_BUTTONS);

    let buttons = numbers
        .into_iter()
        .map(|n| Button::new(n.to_string(), format!("reply:{n}")))
        .collect();
    Some(Keyboard::rows(buttons, 4))
}

impl Bridge {
    /// Deliver an assistant response as one or more chat messages.
    pub async fn send_response(&self, chat_id: &str, text: &str) {
        if text.trim().is_empty() {
            self.send_html(chat_id, "<i>(no output)</i>").await;
            return;
        }

        let keyboard = detect_options(text);
        let html = markdown_to_telegram_html(text);
        let chunks: Vec<String> = split_text(&html, self.settings.chunk_size)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let kb = if i == last { keyboard.as_ref() } else { None };
            if let Err(e) = self
                .transport
                .send_message(chat_id, chunk, ParseMode::Html, kb)
                .await
            {
                warn!(error = %e, chunk = i, "HTML send failed, retrying as plain text");
                let plain = html_to_plain(chunk);
                if let Err(e) = self
                    .transport
                    .send_message(chat_id, &plain, ParseMode::Plain, kb)
                    .await
                {
                    error!(error = %e, chunk = i, "plain-text send failed");
                }
            }
            if i != last && !self.settings.chunk_delay.is_zero() {
                tokio::time::sleep(self.settings.chunk_delay).await;
            }
        }
    }
}
