//! Whiteboard session
//!
//! Owns every shared structure of one peer (log, directory, object store,
//! switch) and the tasks that move data between them. Nothing here is a
//! process global; two sessions in one process are independent peers.

use crate::action_log::ActionLog;
use crate::broadcast::{BroadcastBus, BusHandle, NetworkSwitch};
use crate::canvas::{Canvas, CanvasHandle};
use crate::collab::{HeadlessUi, Renderer, SessionUi};
use crate::config::SyncConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ReplicationError, SessionError};
use crate::history::{CatchUp, HistoryReplicator};
use crate::identity::LocalIdentity;
use crate::object_store::{ObjectKey, ObjectStore};
use crate::peers::PeerDirectory;
use crate::transfer::ObjectTransfer;
use crate::workers::WorkerPool;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use whiteboard_wire::{Action, ActionRecord, Control, ControlRecord, PeerId};

/// Builder for a [`Session`]
pub struct SessionBuilder {
    config: SyncConfig,
    renderer: Arc<dyn Renderer>,
    ui: Arc<dyn SessionUi>,
    identity: Option<LocalIdentity>,
    transport: Option<(std::net::UdpSocket, SocketAddr)>,
}

impl SessionBuilder {
    pub fn new(config: SyncConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            config,
            renderer,
            ui: Arc::new(HeadlessUi),
            identity: None,
            transport: None,
        }
    }

    pub fn ui(mut self, ui: Arc<dyn SessionUi>) -> Self {
        self.ui = ui;
        self
    }

    /// Use a fixed identity instead of a random id on the resolved address
    pub fn identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Carry bus traffic over `socket`, sending to `target`, instead of
    /// joining the multicast group
    pub fn transport(mut self, socket: std::net::UdpSocket, target: SocketAddr) -> Self {
        self.transport = Some((socket, target));
        self
    }

    /// Bind, join and spawn every session task
    ///
    /// The session starts disconnected. Must be called from within a tokio
    /// runtime.
    pub async fn start(self) -> Result<Session, SessionError> {
        let config = self.config;
        let identity = match self.identity {
            Some(identity) => identity,
            None => LocalIdentity::resolve(&config)?,
        };

        let switch = NetworkSwitch::default();
        let mut bus = match self.transport {
            Some((socket, target)) => BroadcastBus::from_socket(
                socket,
                target,
                identity.id(),
                switch.clone(),
                config.recv_buffer(),
            )?,
            None => BroadcastBus::bind(&config, identity.id(), switch.clone())?,
        };
        let inbound = bus.subscribe().ok_or(SessionError::AlreadySubscribed)?;
        let bus_handle = bus.handle();

        let token = CancellationToken::new();
        let log = ActionLog::with_capacity(config.log_capacity);
        let directory = PeerDirectory::new();
        let objects = ObjectStore::new();

        let transfer = Arc::new(ObjectTransfer::new(
            identity,
            bus_handle.clone(),
            objects.clone(),
            &config,
            token.clone(),
        ));
        let replicator = HistoryReplicator::new(
            identity,
            &config,
            bus_handle.clone(),
            directory.clone(),
            log.clone(),
            token.clone(),
        );
        let (canvas, canvas_handle) = Canvas::new(
            identity.id(),
            log.clone(),
            objects.clone(),
            transfer,
            switch.clone(),
            self.renderer,
            self.ui.clone(),
        );
        let dispatcher = Dispatcher {
            identity,
            history_port: config.history_port,
            log: log.clone(),
            directory: directory.clone(),
            objects: objects.clone(),
            bus: bus_handle.clone(),
            workers: WorkerPool::new(config.max_workers, token.clone()),
            canvas: canvas_handle.clone(),
            ui: self.ui.clone(),
        };

        let mut tasks = bus.spawn(token.clone());
        tasks.push(tokio::spawn(canvas.run(token.clone())));
        tasks.push(tokio::spawn(dispatcher.run(inbound, token.clone())));

        tracing::info!("Session {} started", identity.id());

        Ok(Session {
            identity,
            config,
            switch,
            bus: bus_handle,
            log,
            directory,
            objects,
            canvas: canvas_handle,
            replicator,
            ui: self.ui,
            transition: Mutex::new(()),
            token,
            tasks,
        })
    }
}

/// One peer's participation in the shared whiteboard
pub struct Session {
    identity: LocalIdentity,
    config: SyncConfig,
    switch: NetworkSwitch,
    bus: BusHandle,
    log: ActionLog,
    directory: PeerDirectory,
    objects: ObjectStore,
    canvas: CanvasHandle,
    replicator: HistoryReplicator,
    ui: Arc<dyn SessionUi>,
    /// Serializes connect and disconnect
    transition: Mutex<()>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Turn the network on, discover peers and pull history
    ///
    /// Calling this while already connected does nothing and reports the
    /// current peer count.
    pub async fn connect(&self) -> Result<CatchUp, ReplicationError> {
        let _guard = self.transition.lock().await;
        if self.switch.enable() {
            tracing::debug!("Already connected");
            return Ok(CatchUp {
                peers: self.directory.len(),
                ..Default::default()
            });
        }
        tracing::info!("Connecting as {}", self.identity.id());

        let canvas = self.canvas.clone();
        let report = match self
            .replicator
            .catch_up(move |record| canvas.paint(record))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                self.switch.disable();
                self.directory.reset();
                return Err(e);
            }
        };
        self.canvas.flush().await;

        self.ui.peer_count_changed(self.directory.len());
        tracing::info!(
            "Connected: {} peers, {} history records",
            report.peers,
            self.log.len()
        );
        Ok(report)
    }

    /// Announce departure and turn the network off
    pub async fn disconnect(&self) {
        let _guard = self.transition.lock().await;
        if !self.switch.is_enabled() {
            return;
        }

        self.bus.send(ControlRecord::new(
            self.identity.id(),
            Control::Leave {
                addr: self.identity.addr(self.config.history_port),
            },
        ));
        tokio::time::sleep(self.config.leave_flush()).await;
        self.switch.disable();

        // Records still queued were admitted while the switch was on; let
        // the pipeline drain them before emptying the log
        self.canvas.flush().await;
        self.log.clear();
        self.directory.reset();

        self.ui.peer_count_changed(0);
        self.ui.history_len_changed(0);
        tracing::info!("Disconnected");
    }

    /// Apply a locally drawn action and broadcast it
    pub fn submit(&self, action: Action) -> ActionRecord {
        let record = ActionRecord::new(self.identity.id(), action);
        self.canvas.paint(record);
        self.bus.send(record);
        record
    }

    /// Clear locally and ask every peer to do the same
    pub fn request_clear(&self) {
        self.canvas.reset();
        self.bus
            .send(ControlRecord::new(self.identity.id(), Control::ClearRequest));
    }

    /// Store `blob` as a new local object and place it at `(x, y)`
    pub fn share_object(&self, x: i32, y: i32, blob: Bytes) -> ActionRecord {
        let key = self.objects.next_local_key();
        self.objects
            .insert(ObjectKey::new(self.identity.id(), key), blob);
        self.submit(Action::Image {
            x,
            y,
            key,
            holder: self.identity.addr(self.config.object_port),
        })
    }

    /// Redraw the current log from a blank surface, pausing `delay` between
    /// records. The log itself is left untouched.
    pub async fn replay(&self, delay: Duration) -> usize {
        let snapshot = self.log.snapshot();
        tracing::info!("Replaying {} records", snapshot.len());

        self.canvas
            .replay(ActionRecord::new(self.identity.id(), Action::Clear));
        for record in &snapshot {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.canvas.replay(*record);
        }
        self.canvas.flush().await;
        snapshot.len()
    }

    /// Wait until every record queued so far has been applied
    pub async fn settle(&self) {
        self.canvas.flush().await;
    }

    /// Leave if connected, then stop every task
    pub async fn shutdown(mut self) {
        self.disconnect().await;
        self.token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Session task failed: {}", e);
            }
        }
        tracing::info!("Session {} stopped", self.identity.id());
    }

    pub fn local_id(&self) -> PeerId {
        self.identity.id()
    }

    pub fn identity(&self) -> LocalIdentity {
        self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.switch.is_enabled()
    }

    pub fn peer_count(&self) -> usize {
        self.directory.len()
    }

    pub fn history_len(&self) -> usize {
        self.log.len()
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
