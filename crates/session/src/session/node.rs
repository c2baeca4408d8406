//! Per-peer session node
//!
//! Wires clock sync, shared state, recording and transfer to one transport
//! endpoint. A single dispatcher task consumes the transport's events in
//! order; anything that waits on a reply (clock sampling, countdowns,
//! transfers) runs in its own task so replies are never stuck behind it.

use super::events::SessionEvent;
use super::manifest::{CompositionClip, CompositorManifest};
use crate::channels::{RecordingMessage, WireMessage};
use crate::config::SessionConfig;
use crate::peer::{PeerId, PeerIdentity, PeerRef};
use crate::recording::{
    CaptureService, ClipStatus, RecordingClip, RecordingCoordinator, RecordingEvent,
    RecordingState,
};
use crate::state::{SharedStateSnapshot, StateReconciler};
use crate::sync::{Clock, ClockSyncService};
use crate::transfer::{
    content_hash, ReceivedPayload, TransferEvent, TransferJob, TransferQueue, TransferReceiver,
    TransferSender, TransferStatus,
};
use crate::transport::{MeshEvent, MeshTransport};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Receivers handed to the dispatcher on `run`
struct LoopChannels {
    recording_rx: mpsc::UnboundedReceiver<RecordingEvent>,
    transfer_rx: mpsc::UnboundedReceiver<TransferEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// One participant's view of a recording session
pub struct SessionNode {
    config: SessionConfig,
    identity: PeerIdentity,
    transport: Arc<dyn MeshTransport>,
    clock_sync: Arc<ClockSyncService>,
    state: StateReconciler,
    recording: Arc<RecordingCoordinator>,
    sender: Arc<TransferSender>,
    receiver: TransferReceiver,
    queue: Arc<TransferQueue>,

    /// Verified payloads from peers, by transfer id
    received: Mutex<HashMap<String, ReceivedPayload>>,

    events: broadcast::Sender<SessionEvent>,
    channels: Mutex<Option<LoopChannels>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SessionNode {
    /// Build a node for `identity` on top of `transport`
    ///
    /// # Errors
    ///
    /// Returns error if `config` fails validation or the transport's local id
    /// differs from `identity`.
    pub fn new(
        config: SessionConfig,
        identity: PeerIdentity,
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
        capture: Arc<dyn CaptureService>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if transport.local_peer_id() != identity.local_id() {
            return Err(Error::InvalidConfig(format!(
                "Transport is bound to {}, identity says {}",
                transport.local_peer_id(),
                identity.local_id()
            )));
        }

        let (recording_tx, recording_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let clock_sync = Arc::new(ClockSyncService::new(
            identity.clone(),
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.clock.clone(),
        ));
        let state = StateReconciler::new(identity.clone(), Arc::clone(&transport), Arc::clone(&clock));
        let recording = Arc::new(RecordingCoordinator::new(
            identity.clone(),
            Arc::clone(&transport),
            clock,
            Arc::clone(&clock_sync),
            capture,
            config.recording.clone(),
            recording_tx,
        ));
        let sender = Arc::new(TransferSender::new(
            Arc::clone(&transport),
            config.transfer.clone(),
        ));
        let receiver =
            TransferReceiver::new(Arc::clone(&transport), config.transfer.max_incoming_size);
        let queue = TransferQueue::new(
            Arc::clone(&sender),
            config.transfer.max_parallel,
            transfer_tx,
        );

        info!(
            "Session node {} created ({:?}, host {})",
            identity.local_id(),
            identity.role(),
            identity.host_id()
        );

        Ok(Arc::new(Self {
            config,
            identity,
            transport,
            clock_sync,
            state,
            recording,
            sender,
            receiver,
            queue,
            received: Mutex::new(HashMap::new()),
            events,
            channels: Mutex::new(Some(LoopChannels {
                recording_rx,
                transfer_rx,
                shutdown_rx,
            })),
            shutdown_tx,
        }))
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start consuming transport events
    ///
    /// # Errors
    ///
    /// Returns error if the node is already running.
    pub fn run(
        self: &Arc<Self>,
        mesh_events: mpsc::UnboundedReceiver<MeshEvent>,
    ) -> Result<JoinHandle<()>> {
        let channels = self
            .channels
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("Session node already running".to_string()))?;

        // Recording commands run in order, off the dispatcher, since pre-sync
        // waits on clock replies the dispatcher must route
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run_recording_commands(command_rx).await;
        });

        let node = Arc::clone(self);
        Ok(tokio::spawn(async move {
            node.dispatch_loop(mesh_events, channels, command_tx).await;
        }))
    }

    async fn run_recording_commands(
        &self,
        mut commands: mpsc::UnboundedReceiver<(PeerId, RecordingMessage)>,
    ) {
        while let Some((from, message)) = commands.recv().await {
            self.recording.handle_message(&from, message).await;
        }
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut mesh_events: mpsc::UnboundedReceiver<MeshEvent>,
        channels: LoopChannels,
        commands: mpsc::UnboundedSender<(PeerId, RecordingMessage)>,
    ) {
        let LoopChannels {
            mut recording_rx,
            mut transfer_rx,
            mut shutdown_rx,
        } = channels;
        debug!("Session loop started for {}", self.identity.local_id());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Session loop for {} shutting down", self.identity.local_id());
                    break;
                }

                event = mesh_events.recv() => match event {
                    Some(event) => self.handle_mesh_event(event, &commands).await,
                    None => {
                        info!("Mesh closed for {}", self.identity.local_id());
                        break;
                    }
                },

                Some(event) = recording_rx.recv() => {
                    self.handle_recording_event(event);
                }

                Some(event) = transfer_rx.recv() => {
                    self.handle_transfer_event(event);
                }
            }
        }
    }

    async fn handle_mesh_event(
        self: &Arc<Self>,
        event: MeshEvent,
        commands: &mpsc::UnboundedSender<(PeerId, RecordingMessage)>,
    ) {
        match event {
            MeshEvent::PeerJoined(peer) => {
                info!("Peer {} joined", peer);
                if let Err(e) = self.state.on_peer_joined(&peer).await {
                    warn!("Bootstrap push to {} failed: {}", peer, e);
                }
                self.emit(SessionEvent::PeerJoined(peer.clone()));
                self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));

                if !self.identity.is_host() && &peer == self.identity.host_id() {
                    self.spawn_host_sync();
                }
            }
            MeshEvent::PeerLeft(peer) => {
                info!("Peer {} left", peer);
                self.state.on_peer_left(&peer);
                self.clock_sync.forget(&peer);
                self.receiver.discard_peer(&peer);
                self.sender.cancel_peer(&peer);
                self.emit(SessionEvent::PeerLeft(peer));
                self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
            }
            MeshEvent::Message { from, message } => {
                self.handle_message(from, message, commands).await;
            }
        }
    }

    async fn handle_message(
        &self,
        from: PeerId,
        message: WireMessage,
        commands: &mpsc::UnboundedSender<(PeerId, RecordingMessage)>,
    ) {
        match message {
            WireMessage::ClockSyncRequest(request) => {
                self.clock_sync.handle_request(&from, request).await;
            }
            WireMessage::ClockSyncResponse(response) => {
                self.clock_sync.handle_response(&from, response);
            }
            WireMessage::FocusChange(update) => {
                if self.state.on_focus_change(&from, update) {
                    self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
                }
            }
            WireMessage::TileOrder(update) => {
                if self.state.on_tile_order(&from, update) {
                    self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
                }
            }
            WireMessage::ActiveScreenShare(update) => {
                if self.state.on_screen_share(&from, update) {
                    self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
                }
            }
            WireMessage::Recording(command) => {
                if commands.send((from, command)).is_err() {
                    error!("Recording command worker is gone");
                }
            }
            WireMessage::PeerClip(announcement) => {
                // Emitted through the coordinator's event channel
                self.recording.handle_peer_clip(&from, announcement);
            }
            WireMessage::TransferMetadata(metadata) => {
                self.receiver.handle_metadata(&from, metadata).await;
            }
            WireMessage::TransferChunk(chunk) => match self.receiver.handle_chunk(&from, chunk).await {
                Ok(Some(payload)) => {
                    self.emit(SessionEvent::PayloadReceived {
                        from: payload.from.clone(),
                        id: payload.id.clone(),
                        filename: payload.filename.clone(),
                        size: payload.data.len(),
                    });
                    self.received.lock().insert(payload.id.clone(), payload);
                }
                Ok(None) => {}
                Err(e) => {
                    self.emit(SessionEvent::PayloadRejected {
                        from,
                        error: e.to_string(),
                    });
                }
            },
            WireMessage::TransferAck(ack) => self.sender.handle_ack(&from, ack),
            WireMessage::TransferError(error) => self.sender.handle_error(&from, error),
        }
    }

    fn spawn_host_sync(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let offset = node.clock_sync.refresh_host_offset().await;
            node.emit(SessionEvent::ClockSynced {
                peer: node.identity.host_id().clone(),
                offset_ms: offset,
            });
        });
    }

    fn handle_recording_event(&self, event: RecordingEvent) {
        match event {
            RecordingEvent::Countdown(n) => self.emit(SessionEvent::Countdown(n)),
            RecordingEvent::Started { global_clock_start } => {
                self.emit(SessionEvent::RecordingStarted { global_clock_start })
            }
            RecordingEvent::Stopped => self.emit(SessionEvent::RecordingStopped),
            RecordingEvent::LocalClip(clip) => self.emit(SessionEvent::LocalClipUpdated(clip)),
            RecordingEvent::PeerClipUpdated(clip) => {
                self.emit(SessionEvent::PeerClipUpdated(clip))
            }
            RecordingEvent::ClipFinalized(clip) => {
                self.emit(SessionEvent::ClipFinalized {
                    clip_id: clip.id.clone(),
                    source_type: clip.source_type,
                    size: clip.payload.as_ref().map_or(0, |p| p.len()),
                });
                if self.config.transfer.auto_deliver && !self.identity.is_host() {
                    if let Err(e) = self.deliver_clip(&clip) {
                        warn!("Automatic delivery of clip {} failed: {}", clip.id, e);
                    }
                }
            }
        }
    }

    fn handle_transfer_event(&self, event: TransferEvent) {
        let event = match event {
            TransferEvent::Progress {
                id,
                peer_id,
                progress,
            } => SessionEvent::TransferProgress {
                id,
                peer_id,
                progress,
            },
            TransferEvent::Completed { id, peer_id } => {
                SessionEvent::TransferCompleted { id, peer_id }
            }
            TransferEvent::Failed {
                id,
                peer_id,
                kind,
                error,
            } => SessionEvent::TransferFailed {
                id,
                peer_id,
                kind,
                error,
            },
        };
        self.emit(event);
    }

    fn file_extension(&self) -> &str {
        let mime = &self.config.recording.mime_type;
        mime.split(';')
            .next()
            .and_then(|essence| essence.rsplit('/').next())
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin")
    }

    /// Queue one finalized clip for the host; the job id is the clip id
    fn deliver_clip(&self, clip: &RecordingClip) -> Result<()> {
        let payload = clip.payload.clone().ok_or_else(|| {
            Error::InvalidState(format!("Clip {} has no payload yet", clip.id))
        })?;
        self.queue.enqueue(
            self.identity.host_id().clone(),
            clip.id.to_string(),
            clip.filename(self.file_extension()),
            self.config.recording.mime_type.clone(),
            payload,
        )
    }

    /// Queue every finalized local clip not yet delivered to the host
    ///
    /// Returns the number of clips queued. On the host this is 0: the host
    /// is where recordings are gathered.
    pub fn deliver_recordings(&self) -> Result<usize> {
        if self.identity.is_host() {
            debug!("Host keeps its own recordings");
            return Ok(0);
        }

        let mut queued = 0;
        for clip in self.recording.finalized_clips() {
            let in_flight_or_done = self.queue.job(clip.id.as_str()).is_some_and(|job| {
                job.status != TransferStatus::Error
            });
            if in_flight_or_done {
                continue;
            }
            self.deliver_clip(&clip)?;
            queued += 1;
        }
        info!("Queued {} recording(s) for the host", queued);
        Ok(queued)
    }

    /// Re-queue a failed delivery
    pub fn retry_transfer(&self, id: &str) -> Result<()> {
        self.queue.retry(id)
    }

    pub fn transfers(&self) -> Vec<TransferJob> {
        self.queue.jobs()
    }

    /// Start a session-wide recording; host only
    pub async fn start_recording(&self) -> Result<u64> {
        self.recording.start_recording().await
    }

    /// Stop the session-wide recording; host only
    pub async fn stop_recording(&self) -> Result<()> {
        self.recording.stop_recording().await
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording.state()
    }

    pub async fn set_camera_enabled(&self, enabled: bool) {
        self.recording.set_camera_enabled(enabled).await;
    }

    pub async fn set_screen_enabled(&self, enabled: bool) {
        self.recording.set_screen_enabled(enabled).await;
    }

    /// Local clips in creation order
    pub fn clips(&self) -> Vec<RecordingClip> {
        self.recording.clips()
    }

    pub async fn set_focus(&self, peer: Option<PeerRef>) -> Result<()> {
        self.state.set_focus(peer).await?;
        self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
        Ok(())
    }

    pub async fn set_screen_share(&self, peer: Option<PeerRef>) -> Result<()> {
        self.state.set_screen_share(peer).await?;
        self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
        Ok(())
    }

    pub async fn set_tile_order(&self, order: Vec<PeerRef>) -> Result<()> {
        self.state.set_tile_order(order).await?;
        self.emit(SessionEvent::SharedStateChanged(self.state.snapshot()));
        Ok(())
    }

    pub fn shared_state(&self) -> SharedStateSnapshot {
        self.state.snapshot()
    }

    pub fn host_offset(&self) -> i64 {
        self.clock_sync.host_offset()
    }

    /// Payload received from a peer for transfer `id`
    pub fn received_payload(&self, id: &str) -> Option<ReceivedPayload> {
        self.received.lock().get(id).cloned()
    }

    /// Manifest of the latest take; empty before the first recording
    pub fn compositor_manifest(&self) -> CompositorManifest {
        match self.recording.global_clock_start() {
            Some(start) => self.compositor_manifest_for(start),
            None => {
                let snapshot = self.state.snapshot();
                CompositorManifest {
                    global_clock_start: None,
                    clips: Vec::new(),
                    focus_history: self.state.focus_history(),
                    tile_order: self.identity.to_wire_list(&snapshot.tile_order),
                    screen_share_peer: self
                        .identity
                        .to_wire_opt(snapshot.screen_share_peer.as_ref()),
                }
            }
        }
    }

    /// Clip records of one take plus every payload available here
    ///
    /// Own clips use their local payload; remote clips use the payload
    /// delivered under the clip's id, if it has arrived. Clips of other takes
    /// are timed against another origin and are left out.
    pub fn compositor_manifest_for(&self, global_clock_start: u64) -> CompositorManifest {
        let local: HashMap<String, RecordingClip> = self
            .recording
            .clips()
            .into_iter()
            .filter(|c| c.status == ClipStatus::Finalized)
            .map(|c| (c.id.to_string(), c))
            .collect();
        let received = self.received.lock().clone();

        let clips = self
            .recording
            .take_clips(global_clock_start)
            .into_iter()
            .map(|clip| {
                let key = clip.clip_id.to_string();
                let payload = if &clip.peer_id == self.identity.local_id() {
                    local.get(&key).and_then(|c| c.payload.clone())
                } else {
                    received.get(&key).map(|p| p.data.clone())
                };
                CompositionClip {
                    payload_size: payload.as_ref().map(|p| p.len()),
                    payload_hash: payload.as_ref().map(|p| content_hash(p)),
                    payload,
                    clip,
                }
            })
            .collect();

        let snapshot = self.state.snapshot();
        CompositorManifest {
            global_clock_start: Some(global_clock_start),
            clips,
            focus_history: self.state.focus_history(),
            tile_order: self.identity.to_wire_list(&snapshot.tile_order),
            screen_share_peer: self
                .identity
                .to_wire_opt(snapshot.screen_share_peer.as_ref()),
        }
    }

    /// Leave the session: stop the loop and drop all session state
    pub async fn leave(&self) {
        let _ = self.shutdown_tx.try_send(());
        self.state.reset();
        self.recording.reset();
        self.queue.clear();
        self.receiver.clear();
        self.clock_sync.reset();
        self.received.lock().clear();
        info!(
            "Left session (was {:?}, {} connected)",
            self.identity.role(),
            self.transport.connected_peers().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::SyntheticCapture;
    use crate::sync::SystemClock;
    use crate::transport::MemoryMesh;
    use std::time::Duration;

    fn node(mesh: &MemoryMesh, id: &str, host: &str) -> Arc<SessionNode> {
        let (ep, events) = mesh.join(id.into()).unwrap();
        let node = SessionNode::new(
            SessionConfig::fast_test_preset(),
            PeerIdentity::new(id.into(), host.into()),
            ep,
            Arc::new(SystemClock),
            Arc::new(SyntheticCapture::new(id)),
        )
        .unwrap();
        node.run(events).unwrap();
        node
    }

    #[tokio::test]
    async fn test_rejects_mismatched_identity() {
        let mesh = MemoryMesh::new();
        let (ep, _events) = mesh.join("a".into()).unwrap();
        let result = SessionNode::new(
            SessionConfig::default(),
            PeerIdentity::new("b".into(), "a".into()),
            ep,
            Arc::new(SystemClock),
            Arc::new(SyntheticCapture::new("b")),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let mesh = MemoryMesh::new();
        let host = node(&mesh, "host", "host");
        let (_, spare) = mpsc::unbounded_channel();
        assert!(host.run(spare).is_err());
    }

    #[tokio::test]
    async fn test_shared_state_event_on_remote_focus() {
        let mesh = MemoryMesh::new();
        let host = node(&mesh, "host", "host");
        let guest = node(&mesh, "guest", "host");
        let mut events = guest.subscribe();

        tokio::time::sleep(Duration::from_millis(20)).await;
        host.set_focus(Some(PeerRef::Remote("guest".into())))
            .await
            .unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SessionEvent::SharedStateChanged(s)) = events.recv().await {
                    if s.focused_peer.is_some() {
                        return s;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.focused_peer, Some(PeerRef::Local));
    }

    #[tokio::test]
    async fn test_host_keeps_own_recordings() {
        let mesh = MemoryMesh::new();
        let host = node(&mesh, "host", "host");
        assert_eq!(host.deliver_recordings().unwrap(), 0);
    }
}
