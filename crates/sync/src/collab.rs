//! External collaborators: rendering surface and user interface

use bytes::Bytes;
use whiteboard_wire::{ActionRecord, PeerId};

/// Pixel surface that applied actions are drawn onto
pub trait Renderer: Send + Sync + 'static {
    /// Draw one record. `object` carries the blob for image records when it
    /// could be resolved.
    fn render(&self, record: &ActionRecord, object: Option<&Bytes>);
}

/// Counters and prompts surfaced to the user
pub trait SessionUi: Send + Sync + 'static {
    fn peer_count_changed(&self, _count: usize) {}

    fn history_len_changed(&self, _len: usize) {}

    /// Ask whether to honour a clear request from `requester`. May block.
    fn confirm_clear(&self, requester: PeerId) -> bool;
}

/// Declines every clear request and ignores counters
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessUi;

impl SessionUi for HeadlessUi {
    fn confirm_clear(&self, requester: PeerId) -> bool {
        tracing::info!("Ignoring clear request from {}", requester);
        false
    }
}
