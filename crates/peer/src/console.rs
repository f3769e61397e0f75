//! Log-backed renderer and UI for running without a display

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use whiteboard_sync::{Renderer, SessionUi};
use whiteboard_wire::{Action, ActionRecord, PeerId};

/// Writes every applied record to the log
#[derive(Default)]
pub struct LogRenderer {
    rendered: AtomicUsize,
}

impl LogRenderer {
    pub fn rendered(&self) -> usize {
        self.rendered.load(Ordering::Relaxed)
    }
}

impl Renderer for LogRenderer {
    fn render(&self, record: &ActionRecord, object: Option<&Bytes>) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
        match record.action {
            Action::Image { x, y, key, .. } => match object {
                Some(blob) => tracing::info!(
                    "[{}] image {} at ({}, {}), {} bytes",
                    record.origin,
                    key,
                    x,
                    y,
                    blob.len()
                ),
                None => tracing::info!(
                    "[{}] image {} at ({}, {}) unavailable",
                    record.origin,
                    key,
                    x,
                    y
                ),
            },
            Action::Text { x, y, ch, .. } => {
                let ch = char::from_u32(ch).unwrap_or(char::REPLACEMENT_CHARACTER);
                tracing::info!("[{}] text {:?} at ({}, {})", record.origin, ch, x, y);
            }
            action => tracing::info!("[{}] {:?}", record.origin, action),
        }
    }
}

/// Logs counter changes and answers clear prompts with a fixed policy
pub struct ConsoleUi {
    accept_clear: bool,
}

impl ConsoleUi {
    pub fn new(accept_clear: bool) -> Self {
        Self { accept_clear }
    }
}

impl SessionUi for ConsoleUi {
    fn peer_count_changed(&self, count: usize) {
        tracing::info!("Peers: {}", count);
    }

    fn history_len_changed(&self, len: usize) {
        tracing::debug!("History: {}", len);
    }

    fn confirm_clear(&self, requester: PeerId) -> bool {
        if self.accept_clear {
            tracing::info!("Clearing at the request of {}", requester);
        } else {
            tracing::info!("Declining clear request from {}", requester);
        }
        self.accept_clear
    }
}
