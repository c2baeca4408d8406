//! Events published by a session node

use crate::peer::PeerId;
use crate::recording::{ClipId, PeerClip, SourceType};
use crate::state::SharedStateSnapshot;
use crate::transfer::FailureKind;

/// Everything a UI or compositor front end may want to observe
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    /// Fresh clock offset estimate against the host
    ClockSynced { peer: PeerId, offset_ms: i64 },
    /// Focus, screen share or tile order changed
    SharedStateChanged(SharedStateSnapshot),
    Countdown(u32),
    RecordingStarted { global_clock_start: u64 },
    RecordingStopped,
    /// A local clip started or stopped
    LocalClipUpdated(PeerClip),
    ClipFinalized {
        clip_id: ClipId,
        source_type: SourceType,
        size: usize,
    },
    /// A remote clip announcement was applied
    PeerClipUpdated(PeerClip),
    TransferProgress {
        id: String,
        peer_id: PeerId,
        progress: f32,
    },
    TransferCompleted { id: String, peer_id: PeerId },
    TransferFailed {
        id: String,
        peer_id: PeerId,
        kind: FailureKind,
        error: String,
    },
    /// A verified payload arrived from a peer
    PayloadReceived {
        from: PeerId,
        id: String,
        filename: String,
        size: usize,
    },
    /// An incoming payload failed verification
    PayloadRejected { from: PeerId, error: String },
}
