//! Recording coordinator
//!
//! Drives the session-wide recording lifecycle and the per-clip state machine
//! (`recording -> stopped -> finalized`). Clip times are taken on the global
//! clock: `localNow + hostOffset - globalClockStart`.

use super::capture::{CaptureService, CaptureStream};
use super::clip::{ClipId, ClipStatus, PeerClip, RecordingClip, SourceType, Track};
use crate::channels::{ClipAction, PeerClipMessage, RecordingMessage, WireMessage};
use crate::config::RecordingConfig;
use crate::peer::{PeerId, PeerIdentity};
use crate::sync::{Clock, ClockSyncService};
use crate::transport::{MeshTransport, Target};
use crate::{Error, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Session-wide recording phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    /// Seconds left before start
    Countdown(u32),
    Recording,
    Stopped,
}

/// Notifications emitted by the coordinator
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Countdown(u32),
    Started { global_clock_start: u64 },
    Stopped,
    /// A local clip began or ended
    LocalClip(PeerClip),
    /// A local clip's payload is available
    ClipFinalized(RecordingClip),
    /// A remote peer announced a clip transition
    PeerClipUpdated(PeerClip),
}

struct ActiveCapture {
    clip_id: ClipId,
    stream: Box<dyn CaptureStream>,
}

struct CoordinatorState {
    phase: RecordingState,
    global_clock_start: Option<u64>,
    camera_enabled: bool,
    screen_enabled: bool,
    active: HashMap<Track, ActiveCapture>,
    /// Local clips in creation order
    clips: Vec<RecordingClip>,
    remote: BTreeMap<ClipId, PeerClip>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            phase: RecordingState::Idle,
            global_clock_start: None,
            camera_enabled: true,
            screen_enabled: false,
            active: HashMap::new(),
            clips: Vec::new(),
            remote: BTreeMap::new(),
        }
    }

    fn clip_mut(&mut self, id: &ClipId) -> Option<&mut RecordingClip> {
        self.clips.iter_mut().find(|c| &c.id == id)
    }

    /// End the clip on `track` at `at`; returns the stream to finalize
    fn close_track(&mut self, track: Track, at: i64) -> Option<(ActiveCapture, RecordingClip)> {
        let active = self.active.remove(&track)?;
        let clip = self.clip_mut(&active.clip_id)?;
        clip.global_end_time = Some(at);
        clip.status = ClipStatus::Stopped;
        let clip = clip.clone();
        Some((active, clip))
    }

    fn open_track(
        &mut self,
        owner: PeerId,
        source: SourceType,
        stream: Box<dyn CaptureStream>,
        global_clock_start: u64,
        at: i64,
    ) -> RecordingClip {
        let clip = RecordingClip::start(owner, source, global_clock_start, at);
        self.active.insert(
            source.track(),
            ActiveCapture {
                clip_id: clip.id.clone(),
                stream,
            },
        );
        self.clips.push(clip.clone());
        clip
    }
}

/// Per-peer recording coordinator
pub struct RecordingCoordinator {
    identity: PeerIdentity,
    transport: Arc<dyn MeshTransport>,
    clock: Arc<dyn Clock>,
    clock_sync: Arc<ClockSyncService>,
    capture: Arc<dyn CaptureService>,
    config: RecordingConfig,
    events: mpsc::UnboundedSender<RecordingEvent>,
    state: Mutex<CoordinatorState>,
    /// Serializes lifecycle operations that await capture
    op_lock: tokio::sync::Mutex<()>,
}

impl RecordingCoordinator {
    pub fn new(
        identity: PeerIdentity,
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
        clock_sync: Arc<ClockSyncService>,
        capture: Arc<dyn CaptureService>,
        config: RecordingConfig,
        events: mpsc::UnboundedSender<RecordingEvent>,
    ) -> Self {
        Self {
            identity,
            transport,
            clock,
            clock_sync,
            capture,
            config,
            events,
            state: Mutex::new(CoordinatorState::new()),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn emit(&self, event: RecordingEvent) {
        let _ = self.events.send(event);
    }

    async fn broadcast(&self, message: RecordingMessage) -> Result<()> {
        self.transport
            .send(Target::All, &WireMessage::Recording(message))
            .await
    }

    /// Current time on the global clock, relative to `globalClockStart`
    fn global_now(&self, global_clock_start: u64) -> i64 {
        self.clock_sync.to_host_time(self.clock.now_ms()) - global_clock_start as i64
    }

    pub fn state(&self) -> RecordingState {
        self.state.lock().phase
    }

    pub fn global_clock_start(&self) -> Option<u64> {
        self.state.lock().global_clock_start
    }

    pub fn camera_enabled(&self) -> bool {
        self.state.lock().camera_enabled
    }

    pub fn screen_enabled(&self) -> bool {
        self.state.lock().screen_enabled
    }

    /// Start a session-wide recording (host only)
    ///
    /// Broadcasts `pre-sync`, counts down one tick per `countdown_tick_ms`,
    /// then broadcasts `start` carrying the host's clock as the global origin
    /// and starts local capture.
    ///
    /// # Errors
    ///
    /// [`Error::NotHost`] on a guest, [`Error::InvalidState`] if a countdown
    /// or recording is already running.
    pub async fn start_recording(&self) -> Result<u64> {
        if !self.identity.is_host() {
            return Err(Error::NotHost("start a recording".to_string()));
        }
        {
            let mut state = self.state.lock();
            match state.phase {
                RecordingState::Idle | RecordingState::Stopped => {
                    state.phase = RecordingState::Countdown(self.config.countdown_secs);
                }
                phase => {
                    return Err(Error::InvalidState(format!(
                        "Cannot start recording while {:?}",
                        phase
                    )));
                }
            }
        }

        info!("Starting recording, countdown {}s", self.config.countdown_secs);
        if let Err(e) = self.run_countdown().await {
            self.state.lock().phase = RecordingState::Idle;
            return Err(e);
        }

        // Fresh sync before the origin is fixed; returns at once on the host
        self.clock_sync.refresh_host_offset().await;

        let global_clock_start = self.clock.now_ms();
        if let Err(e) = self
            .broadcast(RecordingMessage::Start { global_clock_start })
            .await
        {
            self.state.lock().phase = RecordingState::Idle;
            return Err(e);
        }
        self.begin(global_clock_start).await;
        Ok(global_clock_start)
    }

    async fn run_countdown(&self) -> Result<()> {
        self.broadcast(RecordingMessage::PreSync).await?;
        for countdown in (1..=self.config.countdown_secs).rev() {
            self.state.lock().phase = RecordingState::Countdown(countdown);
            self.emit(RecordingEvent::Countdown(countdown));
            self.broadcast(RecordingMessage::Countdown { countdown })
                .await?;
            tokio::time::sleep(self.config.countdown_tick()).await;
        }
        Ok(())
    }

    /// Stop the session-wide recording (host only)
    pub async fn stop_recording(&self) -> Result<()> {
        if !self.identity.is_host() {
            return Err(Error::NotHost("stop a recording".to_string()));
        }
        if self.state() != RecordingState::Recording {
            return Err(Error::InvalidState(format!(
                "Cannot stop recording while {:?}",
                self.state()
            )));
        }

        self.broadcast(RecordingMessage::Stop).await?;
        self.end().await;
        Ok(())
    }

    /// React to a host recording command
    ///
    /// Commands from anyone but the host are dropped.
    pub async fn handle_message(&self, from: &PeerId, message: RecordingMessage) {
        if from != self.identity.host_id() {
            warn!("Ignoring recording command {:?} from non-host {}", message, from);
            return;
        }

        match message {
            RecordingMessage::PreSync => {
                debug!("Pre-sync requested by host");
                self.clock_sync.refresh_host_offset().await;
            }
            RecordingMessage::Countdown { countdown } => {
                let mut state = self.state.lock();
                if matches!(state.phase, RecordingState::Recording) {
                    return;
                }
                state.phase = RecordingState::Countdown(countdown);
                drop(state);
                self.emit(RecordingEvent::Countdown(countdown));
            }
            RecordingMessage::Start { global_clock_start } => {
                self.begin(global_clock_start).await;
            }
            RecordingMessage::Stop => {
                self.end().await;
            }
        }
    }

    /// Start every enabled local source against `global_clock_start`
    async fn begin(&self, global_clock_start: u64) {
        let _op = self.op_lock.lock().await;

        let sources = {
            let mut state = self.state.lock();
            if state.phase == RecordingState::Recording {
                warn!("Already recording, ignoring start");
                return;
            }
            state.phase = RecordingState::Recording;
            state.global_clock_start = Some(global_clock_start);

            let mut sources = vec![if state.camera_enabled {
                SourceType::Camera
            } else {
                SourceType::AudioOnly
            }];
            if state.screen_enabled {
                sources.push(SourceType::Screen);
            }
            sources
        };

        info!(
            "Recording started (globalClockStart={}, host offset {}ms)",
            global_clock_start,
            self.clock_sync.host_offset()
        );
        self.emit(RecordingEvent::Started { global_clock_start });

        for source in sources {
            self.open_source(source, global_clock_start).await;
        }
    }

    /// Start one capture and announce it; a failed source is skipped
    async fn open_source(&self, source: SourceType, global_clock_start: u64) {
        let stream = match self.capture.start_capture(source).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Capture of {} failed to start, continuing without it: {}", source, e);
                return;
            }
        };

        let clip = {
            let mut state = self.state.lock();
            let at = self.global_now(global_clock_start);
            state.open_track(
                self.identity.local_id().clone(),
                source,
                stream,
                global_clock_start,
                at,
            )
        };
        self.announce(&clip, ClipAction::Started).await;
    }

    /// Stop every active clip at one shared end time and finalize them
    async fn end(&self) {
        let _op = self.op_lock.lock().await;

        let closed = {
            let mut state = self.state.lock();
            if state.phase != RecordingState::Recording {
                debug!("Not recording, ignoring stop");
                return;
            }
            state.phase = RecordingState::Stopped;
            let Some(start) = state.global_clock_start else {
                return;
            };
            let at = self.global_now(start);
            let tracks: Vec<Track> = state.active.keys().copied().collect();
            tracks
                .into_iter()
                .filter_map(|track| state.close_track(track, at))
                .collect::<Vec<_>>()
        };

        info!("Recording stopped, finalizing {} clip(s)", closed.len());
        for (_, clip) in &closed {
            self.announce(clip, ClipAction::Stopped).await;
        }
        self.emit(RecordingEvent::Stopped);
        // Encoders flush independently
        join_all(closed.into_iter().map(|(active, _)| self.finalize(active))).await;
    }

    /// Toggle the camera
    ///
    /// While recording, the camera clip and an audio-only clip swap on the
    /// presence track at one global timestamp, so the timeline has neither a
    /// gap nor an overlap.
    pub async fn set_camera_enabled(&self, enabled: bool) {
        let _op = self.op_lock.lock().await;

        let global_clock_start = {
            let mut state = self.state.lock();
            if state.camera_enabled == enabled {
                return;
            }
            state.camera_enabled = enabled;
            match (state.phase, state.global_clock_start) {
                (RecordingState::Recording, Some(start)) => start,
                _ => return,
            }
        };

        let next = if enabled {
            SourceType::Camera
        } else {
            SourceType::AudioOnly
        };
        self.swap_presence(next, global_clock_start).await;
    }

    async fn swap_presence(&self, next: SourceType, global_clock_start: u64) {
        let stream = match self.capture.start_capture(next).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Capture of {} failed to start, presence track ends: {}", next, e);
                None
            }
        };

        let (closed, opened) = {
            let mut state = self.state.lock();
            let at = self.global_now(global_clock_start);
            let closed = state.close_track(Track::Presence, at);
            let owner = self.identity.local_id().clone();
            let opened = stream.map(|s| state.open_track(owner, next, s, global_clock_start, at));
            (closed, opened)
        };

        if let Some((_, clip)) = &closed {
            self.announce(clip, ClipAction::Stopped).await;
        }
        if let Some(clip) = &opened {
            debug!("Presence track switched to {} at {}ms", next, clip.global_start_time);
            self.announce(clip, ClipAction::Started).await;
        }
        if let Some((active, _)) = closed {
            self.finalize(active).await;
        }
    }

    /// Toggle screen capture; starts or stops a screen clip while recording
    pub async fn set_screen_enabled(&self, enabled: bool) {
        let _op = self.op_lock.lock().await;

        let global_clock_start = {
            let mut state = self.state.lock();
            if state.screen_enabled == enabled {
                return;
            }
            state.screen_enabled = enabled;
            match (state.phase, state.global_clock_start) {
                (RecordingState::Recording, Some(start)) => start,
                _ => return,
            }
        };

        if enabled {
            self.open_source(SourceType::Screen, global_clock_start).await;
            return;
        }

        let closed = {
            let mut state = self.state.lock();
            let at = self.global_now(global_clock_start);
            state.close_track(Track::Screen, at)
        };
        if let Some((active, clip)) = closed {
            self.announce(&clip, ClipAction::Stopped).await;
            self.finalize(active).await;
        }
    }

    async fn announce(&self, clip: &RecordingClip, action: ClipAction) {
        self.emit(RecordingEvent::LocalClip(clip.to_peer_clip()));
        let message = WireMessage::PeerClip(clip.announcement(action));
        if let Err(e) = self.transport.send(Target::All, &message).await {
            warn!("Failed to announce clip {}: {}", clip.id, e);
        }
    }

    async fn finalize(&self, active: ActiveCapture) {
        let payload = match active.stream.finish().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Clip {} could not be finalized: {}", active.clip_id, e);
                return;
            }
        };

        let finalized = {
            let mut state = self.state.lock();
            match state.clip_mut(&active.clip_id) {
                Some(clip) => {
                    clip.payload = Some(payload);
                    clip.status = ClipStatus::Finalized;
                    Some(clip.clone())
                }
                // Reset while the capture was finishing
                None => None,
            }
        };

        if let Some(clip) = finalized {
            info!(
                "Clip {} finalized ({}, {} bytes)",
                clip.id,
                clip.source_type,
                clip.payload.as_ref().map_or(0, |p| p.len())
            );
            self.emit(RecordingEvent::ClipFinalized(clip));
        }
    }

    /// Track a remote clip announcement
    ///
    /// Peers only announce their own clips; anything else is dropped.
    pub fn handle_peer_clip(&self, from: &PeerId, message: PeerClipMessage) -> Option<PeerClip> {
        if &message.peer_id != from || from == self.identity.local_id() {
            warn!(
                "Ignoring clip announcement for {} relayed by {}",
                message.peer_id, from
            );
            return None;
        }

        let action = message.action;
        let incoming = PeerClip::from(message);
        let updated = {
            let mut state = self.state.lock();
            let entry = state
                .remote
                .entry(incoming.clip_id.clone())
                .or_insert_with(|| incoming.clone());
            match action {
                ClipAction::Started => {
                    entry.global_start_time = incoming.global_start_time;
                }
                ClipAction::Stopped => {
                    entry.global_end_time = incoming.global_end_time;
                }
            }
            entry.clone()
        };

        debug!("Peer clip {:?} from {}: {}", action, from, updated.clip_id);
        self.emit(RecordingEvent::PeerClipUpdated(updated.clone()));
        Some(updated)
    }

    /// Every known clip in the session, local and remote, by start time
    pub fn peer_clips(&self) -> Vec<PeerClip> {
        let state = self.state.lock();
        let mut clips: Vec<PeerClip> = state
            .clips
            .iter()
            .map(RecordingClip::to_peer_clip)
            .chain(state.remote.values().cloned())
            .collect();
        clips.sort_by(|a, b| {
            (a.global_start_time, &a.peer_id).cmp(&(b.global_start_time, &b.peer_id))
        });
        clips
    }

    /// Clips of the take that began at `global_clock_start`, by start time
    pub fn take_clips(&self, global_clock_start: u64) -> Vec<PeerClip> {
        self.peer_clips()
            .into_iter()
            .filter(|c| c.global_clock_start == global_clock_start)
            .collect()
    }

    /// Origins of every take with at least one known clip, oldest first
    pub fn takes(&self) -> Vec<u64> {
        let state = self.state.lock();
        let mut takes: Vec<u64> = state
            .clips
            .iter()
            .map(|c| c.global_clock_start)
            .chain(state.remote.values().map(|c| c.global_clock_start))
            .collect();
        takes.sort_unstable();
        takes.dedup();
        takes
    }

    /// Local clips in creation order
    pub fn clips(&self) -> Vec<RecordingClip> {
        self.state.lock().clips.clone()
    }

    pub fn clip(&self, id: &ClipId) -> Option<RecordingClip> {
        self.state.lock().clips.iter().find(|c| &c.id == id).cloned()
    }

    /// Local clips whose payload is available
    pub fn finalized_clips(&self) -> Vec<RecordingClip> {
        self.state
            .lock()
            .clips
            .iter()
            .filter(|c| c.status == ClipStatus::Finalized)
            .cloned()
            .collect()
    }

    /// Drop all clips and captures, as on leaving the session
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if !state.active.is_empty() {
            warn!("Discarding {} active capture(s) on reset", state.active.len());
        }
        *state = CoordinatorState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockSyncConfig;
    use crate::recording::SyntheticCapture;
    use crate::sync::ManualClock;
    use crate::transport::{MemoryMesh, MeshEvent};

    struct Harness {
        coordinator: RecordingCoordinator,
        clock: Arc<ManualClock>,
        capture: Arc<SyntheticCapture>,
        events: mpsc::UnboundedReceiver<RecordingEvent>,
        _mesh_events: mpsc::UnboundedReceiver<MeshEvent>,
    }

    fn harness(mesh: &MemoryMesh, id: &str, host: &str, countdown_secs: u32) -> Harness {
        let (ep, mesh_events) = mesh.join(id.into()).unwrap();
        let identity = PeerIdentity::new(id.into(), host.into());
        let clock = Arc::new(ManualClock::new(10_000));
        let clock_sync = Arc::new(ClockSyncService::new(
            identity.clone(),
            ep.clone(),
            clock.clone(),
            ClockSyncConfig {
                samples: 1,
                sample_spacing_ms: 1,
                sample_timeout_ms: 10,
            },
        ));
        let capture = Arc::new(SyntheticCapture::new(id).with_payload_size(64));
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = RecordingCoordinator::new(
            identity,
            ep,
            clock.clone(),
            clock_sync,
            capture.clone(),
            RecordingConfig {
                countdown_secs,
                countdown_tick_ms: 1,
                ..Default::default()
            },
            tx,
        );
        Harness {
            coordinator,
            clock,
            capture,
            events,
            _mesh_events: mesh_events,
        }
    }

    fn presence_clips(coordinator: &RecordingCoordinator) -> Vec<RecordingClip> {
        coordinator
            .clips()
            .into_iter()
            .filter(|c| c.source_type.track() == Track::Presence)
            .collect()
    }

    #[tokio::test]
    async fn test_guest_cannot_command() {
        let mesh = MemoryMesh::new();
        let guest = harness(&mesh, "guest", "host", 0);

        assert!(matches!(
            guest.coordinator.start_recording().await,
            Err(Error::NotHost(_))
        ));
        assert!(matches!(
            guest.coordinator.stop_recording().await,
            Err(Error::NotHost(_))
        ));
    }

    #[tokio::test]
    async fn test_countdown_then_start() {
        let mesh = MemoryMesh::new();
        let mut host = harness(&mesh, "host", "host", 3);

        let origin = host.coordinator.start_recording().await.unwrap();
        assert_eq!(origin, 10_000);
        assert_eq!(host.coordinator.state(), RecordingState::Recording);

        let mut ticks = Vec::new();
        while let Ok(event) = host.events.try_recv() {
            if let RecordingEvent::Countdown(n) = event {
                ticks.push(n);
            }
        }
        assert_eq!(ticks, vec![3, 2, 1]);

        assert!(matches!(
            host.coordinator.start_recording().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_camera_toggle_is_contiguous() {
        let mesh = MemoryMesh::new();
        let host = harness(&mesh, "host", "host", 0);

        host.coordinator.start_recording().await.unwrap();
        host.clock.advance(1_500);
        host.coordinator.set_camera_enabled(false).await;
        host.clock.advance(2_000);
        host.coordinator.set_camera_enabled(true).await;
        host.clock.advance(700);
        host.coordinator.stop_recording().await.unwrap();

        let clips = presence_clips(&host.coordinator);
        let sources: Vec<SourceType> = clips.iter().map(|c| c.source_type).collect();
        assert_eq!(
            sources,
            vec![SourceType::Camera, SourceType::AudioOnly, SourceType::Camera]
        );

        assert_eq!(clips[0].global_start_time, 0);
        for pair in clips.windows(2) {
            assert_eq!(pair[0].global_end_time, Some(pair[1].global_start_time));
        }
        assert_eq!(clips[1].duration_ms(), Some(2_000));
        assert_eq!(clips[2].global_end_time, Some(4_200));
        assert!(clips.iter().all(|c| c.status == ClipStatus::Finalized));
    }

    #[tokio::test]
    async fn test_toggle_before_start_only_changes_sources() {
        let mesh = MemoryMesh::new();
        let host = harness(&mesh, "host", "host", 0);

        host.coordinator.set_camera_enabled(false).await;
        host.coordinator.set_screen_enabled(true).await;
        assert!(host.coordinator.clips().is_empty());

        host.coordinator.start_recording().await.unwrap();
        let mut sources: Vec<String> = host
            .coordinator
            .clips()
            .iter()
            .map(|c| c.source_type.to_string())
            .collect();
        sources.sort();
        assert_eq!(sources, vec!["audioOnly", "screen"]);
    }

    #[tokio::test]
    async fn test_capture_failure_skips_source() {
        let mesh = MemoryMesh::new();
        let host = harness(&mesh, "host", "host", 0);
        host.capture.fail_source(SourceType::Screen);

        host.coordinator.start_recording().await.unwrap();
        host.coordinator.set_screen_enabled(true).await;
        host.coordinator.stop_recording().await.unwrap();

        let clips = host.coordinator.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].source_type, SourceType::Camera);
        assert_eq!(host.coordinator.finalized_clips().len(), 1);
    }

    #[tokio::test]
    async fn test_guest_follows_host_commands_only() {
        let mesh = MemoryMesh::new();
        let guest = harness(&mesh, "guest", "host", 0);

        guest
            .coordinator
            .handle_message(&"mallory".into(), RecordingMessage::Start { global_clock_start: 1 })
            .await;
        assert_eq!(guest.coordinator.state(), RecordingState::Idle);

        guest
            .coordinator
            .handle_message(
                &"host".into(),
                RecordingMessage::Start {
                    global_clock_start: 9_000,
                },
            )
            .await;
        assert_eq!(guest.coordinator.state(), RecordingState::Recording);
        assert_eq!(guest.coordinator.clips()[0].global_start_time, 1_000);

        guest.clock.advance(250);
        guest
            .coordinator
            .handle_message(&"host".into(), RecordingMessage::Stop)
            .await;
        assert_eq!(guest.coordinator.state(), RecordingState::Stopped);
        assert_eq!(guest.coordinator.clips()[0].global_end_time, Some(1_250));
    }

    #[tokio::test]
    async fn test_peer_clip_view() {
        let mesh = MemoryMesh::new();
        let guest = harness(&mesh, "guest", "host", 0);

        let started = PeerClipMessage {
            clip_id: "c1".into(),
            peer_id: "host".into(),
            source_type: SourceType::Screen,
            global_clock_start: 9_000,
            global_start_time: 40,
            global_end_time: None,
            action: ClipAction::Started,
        };
        assert!(guest
            .coordinator
            .handle_peer_clip(&"carol".into(), started.clone())
            .is_none());
        guest.coordinator.handle_peer_clip(&"host".into(), started.clone());
        guest.coordinator.handle_peer_clip(
            &"host".into(),
            PeerClipMessage {
                global_end_time: Some(900),
                action: ClipAction::Stopped,
                ..started
            },
        );

        let clips = guest.coordinator.peer_clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].global_end_time, Some(900));

        guest.coordinator.reset();
        assert!(guest.coordinator.peer_clips().is_empty());
    }

    #[tokio::test]
    async fn test_takes_are_kept_apart() {
        let mesh = MemoryMesh::new();
        let host = harness(&mesh, "host", "host", 0);

        let first = host.coordinator.start_recording().await.unwrap();
        host.clock.advance(1_000);
        host.coordinator.stop_recording().await.unwrap();
        host.clock.advance(5_000);
        let second = host.coordinator.start_recording().await.unwrap();
        host.clock.advance(400);
        host.coordinator.stop_recording().await.unwrap();

        assert_eq!(host.coordinator.takes(), vec![first, second]);
        let clips = host.coordinator.take_clips(second);
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].global_start_time, 0);
        assert_eq!(clips[0].global_end_time, Some(400));
        assert_eq!(host.coordinator.take_clips(first).len(), 1);
        assert_eq!(host.coordinator.peer_clips().len(), 2);
    }

    fn assert_send<F: std::future::Future + Send>(_: F) {}

    #[tokio::test]
    async fn test_lifecycle_futures_are_send() {
        let mesh = MemoryMesh::new();
        let host = harness(&mesh, "host", "host", 0);
        let from: PeerId = "host".into();

        assert_send(host.coordinator.start_recording());
        assert_send(host.coordinator.stop_recording());
        assert_send(host.coordinator.set_camera_enabled(false));
        assert_send(host.coordinator.set_screen_enabled(true));
        assert_send(host.coordinator.handle_message(&from, RecordingMessage::Stop));
    }
}
