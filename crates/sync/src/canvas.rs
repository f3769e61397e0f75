//! Apply pipeline
//!
//! Every record that reaches the surface, whether drawn locally, received
//! live, pulled during catch-up or replayed, goes through one queue drained by
//! a single task. That task owns the ordering between log appends and
//! rendering. Images whose object is not stored locally are drawn once their
//! fetch completes, unless the surface was cleared in the meantime.

use crate::action_log::ActionLog;
use crate::broadcast::NetworkSwitch;
use crate::collab::{Renderer, SessionUi};
use crate::object_store::{ObjectKey, ObjectStore};
use crate::transfer::ObjectTransfer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{Action, ActionRecord, PeerId};

enum Paint {
    /// Apply and append to the log while connected
    Record(ActionRecord),
    /// Apply without touching the log
    Replay(ActionRecord),
    /// Wipe the surface, the log and the object store
    Reset,
    /// Acknowledge once everything queued before it has been applied
    Flush(oneshot::Sender<()>),
}

/// Cheap handle for queueing work onto the pipeline
#[derive(Clone)]
pub struct CanvasHandle {
    tx: mpsc::UnboundedSender<Paint>,
}

impl CanvasHandle {
    pub fn paint(&self, record: ActionRecord) {
        self.queue(Paint::Record(record));
    }

    pub fn replay(&self, record: ActionRecord) {
        self.queue(Paint::Replay(record));
    }

    pub fn reset(&self) {
        self.queue(Paint::Reset);
    }

    /// Wait until everything queued so far has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.queue(Paint::Flush(tx));
        let _ = rx.await;
    }

    fn queue(&self, paint: Paint) {
        if self.tx.send(paint).is_err() {
            tracing::debug!("Canvas stopped, dropping paint");
        }
    }
}

pub struct Canvas {
    local_id: PeerId,
    log: ActionLog,
    objects: ObjectStore,
    transfer: Arc<ObjectTransfer>,
    switch: NetworkSwitch,
    renderer: Arc<dyn Renderer>,
    ui: Arc<dyn SessionUi>,
    /// Bumped on every reset; a fetched image from an older generation is
    /// not drawn
    generation: Arc<AtomicU64>,
    rx: mpsc::UnboundedReceiver<Paint>,
}

impl Canvas {
    pub fn new(
        local_id: PeerId,
        log: ActionLog,
        objects: ObjectStore,
        transfer: Arc<ObjectTransfer>,
        switch: NetworkSwitch,
        renderer: Arc<dyn Renderer>,
        ui: Arc<dyn SessionUi>,
    ) -> (Self, CanvasHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let canvas = Self {
            local_id,
            log,
            objects,
            transfer,
            switch,
            renderer,
            ui,
            generation: Arc::new(AtomicU64::new(0)),
            rx,
        };
        (canvas, CanvasHandle { tx })
    }

    pub async fn run(mut self, token: CancellationToken) {
        tracing::debug!("Canvas started");
        loop {
            let paint = tokio::select! {
                _ = token.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(paint) => paint,
                    None => break,
                },
            };

            match paint {
                Paint::Record(record) => self.apply(record, true, &token),
                Paint::Replay(record) => self.apply(record, false, &token),
                Paint::Reset => self.reset(),
                Paint::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        tracing::debug!("Canvas stopped");
    }

    fn apply(&self, record: ActionRecord, append: bool, token: &CancellationToken) {
        if append && self.switch.is_enabled() {
            let len = self.log.append(record);
            self.ui.history_len_changed(len);
        }

        let Action::Image { key, .. } = record.action else {
            self.renderer.render(&record, None);
            return;
        };
        let key = ObjectKey::new(record.origin, key);
        if let Some(blob) = self.objects.get(&key) {
            self.renderer.render(&record, Some(&blob));
            return;
        }

        // Missing objects are fetched beside the pipeline so one slow or
        // departed origin does not hold back every record behind it
        let transfer = self.transfer.clone();
        let renderer = self.renderer.clone();
        let generation = self.generation.clone();
        let drawn_in = generation.load(Ordering::SeqCst);
        let token = token.clone();
        tokio::spawn(async move {
            let object = tokio::select! {
                _ = token.cancelled() => return,
                resolved = transfer.resolve(key) => match resolved {
                    Ok(blob) => Some(blob),
                    Err(e) => {
                        tracing::warn!("Rendering image {} without its object: {}", key, e);
                        None
                    }
                },
            };
            if generation.load(Ordering::SeqCst) != drawn_in {
                tracing::debug!("Surface cleared while fetching {}, not drawing it", key);
                return;
            }
            renderer.render(&record, object.as_ref());
        });
    }

    fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.log.clear();
        self.objects.clear();
        self.renderer
            .render(&ActionRecord::new(self.local_id, Action::Clear), None);
        self.ui.history_len_changed(0);
        tracing::info!("Canvas cleared");
    }
}
