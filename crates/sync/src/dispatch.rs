//! Inbound envelope dispatch
//!
//! Runs on the single inbound stream of the broadcast bus. Handling is
//! inline and non-blocking: anything that touches the network or the user is
//! handed to a worker so the receive path never stalls.

use crate::action_log::ActionLog;
use crate::broadcast::{BusHandle, Inbound};
use crate::canvas::CanvasHandle;
use crate::collab::SessionUi;
use crate::history;
use crate::identity::LocalIdentity;
use crate::object_store::{ObjectKey, ObjectStore};
use crate::peers::{PeerDirectory, PeerEntry};
use crate::transfer;
use crate::workers::WorkerPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{Control, ControlRecord, Envelope, PeerId};

pub struct Dispatcher {
    pub(crate) identity: LocalIdentity,
    /// Port advertised in discovery answers
    pub(crate) history_port: u16,
    pub(crate) log: ActionLog,
    pub(crate) directory: PeerDirectory,
    pub(crate) objects: ObjectStore,
    pub(crate) bus: BusHandle,
    pub(crate) workers: WorkerPool,
    pub(crate) canvas: CanvasHandle,
    pub(crate) ui: Arc<dyn SessionUi>,
}

impl Dispatcher {
    pub async fn run(self, mut inbound: Inbound, token: CancellationToken) {
        tracing::debug!("Dispatcher started");
        loop {
            let envelope = tokio::select! {
                _ = token.cancelled() => break,
                next = inbound.next() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.dispatch(envelope);
        }
        tracing::debug!("Dispatcher stopped");
    }

    pub fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Action(record) => self.canvas.paint(record),
            Envelope::Control(ControlRecord { origin, control }) => {
                self.handle_control(origin, control)
            }
        }
    }

    fn handle_control(&self, origin: PeerId, control: Control) {
        match control {
            Control::PeerQuery { addr, history_len } => {
                self.learn(PeerEntry::new(origin, addr, history_len));
                self.bus.send(ControlRecord::new(
                    self.identity.id(),
                    Control::PeerAnswer {
                        addr: self.identity.addr(self.history_port),
                        history_len: self.log.len() as u64,
                    },
                ));
            }
            Control::PeerAnswer { addr, history_len } => {
                self.learn(PeerEntry::new(origin, addr, history_len));
            }
            Control::Leave { addr } => {
                if self.directory.remove_peer(&addr) > 0 {
                    tracing::info!("Peer {} at {} left", origin, addr);
                }
                self.ui.peer_count_changed(self.directory.len());
            }
            Control::HistoryRequest { target, reply_to } => {
                if target != self.identity.id() {
                    return;
                }
                let snapshot = self.log.snapshot();
                tracing::info!(
                    "History request from {}, streaming {} records",
                    origin,
                    snapshot.len()
                );
                self.workers.spawn("history", async move {
                    if let Err(e) = history::serve(snapshot, reply_to).await {
                        tracing::warn!("History responder for {} failed: {}", reply_to, e);
                    }
                });
            }
            Control::ObjectRequest {
                target,
                key,
                reply_to,
            } => {
                if target != self.identity.id() {
                    return;
                }
                let key = ObjectKey::new(target, key);
                let Some(blob) = self.objects.get(&key) else {
                    tracing::warn!("Object request from {} for unknown {}", origin, key);
                    return;
                };
                tracing::debug!("Object request from {} for {}", origin, key);
                self.workers.spawn("object", async move {
                    if let Err(e) = transfer::push_object(blob, reply_to).await {
                        tracing::warn!("Object push to {} failed: {}", reply_to, e);
                    }
                });
            }
            Control::ClearRequest => {
                let ui = self.ui.clone();
                let canvas = self.canvas.clone();
                // The answer is dropped if the session stops while the user
                // is still deciding
                self.workers.spawn("clear prompt", async move {
                    match tokio::task::spawn_blocking(move || ui.confirm_clear(origin)).await {
                        Ok(true) => {
                            tracing::info!("Clear request from {} accepted", origin);
                            canvas.reset();
                        }
                        Ok(false) => tracing::debug!("Clear request from {} declined", origin),
                        Err(e) => tracing::warn!("Clear prompt failed: {}", e),
                    }
                });
            }
        }
    }

    fn learn(&self, entry: PeerEntry) {
        if self.directory.add_peer(entry) {
            tracing::info!("Discovered peer {} at {}", entry.id, entry.addr);
        }
        self.ui.peer_count_changed(self.directory.len());
    }
}
