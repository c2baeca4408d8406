//! Clip records

use crate::channels::{ClipAction, PeerClipMessage};
use crate::peer::PeerId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique clip identifier (uuid v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClipId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Local capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    Camera,
    Screen,
    AudioOnly,
}

impl SourceType {
    /// Timeline track this source occupies
    pub fn track(&self) -> Track {
        match self {
            SourceType::Camera | SourceType::AudioOnly => Track::Presence,
            SourceType::Screen => Track::Screen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Camera => "camera",
            SourceType::Screen => "screen",
            SourceType::AudioOnly => "audioOnly",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At most one active clip per (peer, track)
///
/// Camera and audio-only alternate on the presence track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Presence,
    Screen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Recording,
    Stopped,
    Finalized,
}

/// One continuous local recording segment
///
/// Times are milliseconds on the global clock, relative to the
/// `globalClockStart` of the take the clip belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingClip {
    pub id: ClipId,
    pub owner: PeerId,
    pub source_type: SourceType,
    /// Origin of the take; identifies it
    pub global_clock_start: u64,
    pub global_start_time: i64,
    pub global_end_time: Option<i64>,
    pub status: ClipStatus,
    pub payload: Option<Bytes>,
}

impl RecordingClip {
    pub fn start(
        owner: PeerId,
        source_type: SourceType,
        global_clock_start: u64,
        global_start_time: i64,
    ) -> Self {
        Self {
            id: ClipId::generate(),
            owner,
            source_type,
            global_clock_start,
            global_start_time,
            global_end_time: None,
            status: ClipStatus::Recording,
            payload: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ClipStatus::Recording
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.global_end_time.map(|end| end - self.global_start_time)
    }

    /// Suggested filename for delivery
    pub fn filename(&self, extension: &str) -> String {
        format!("{}-{}-{}.{}", self.owner, self.source_type, self.id, extension)
    }

    /// Payload-free mirror of this clip
    pub fn to_peer_clip(&self) -> PeerClip {
        PeerClip {
            clip_id: self.id.clone(),
            peer_id: self.owner.clone(),
            source_type: self.source_type,
            global_clock_start: self.global_clock_start,
            global_start_time: self.global_start_time,
            global_end_time: self.global_end_time,
        }
    }

    pub fn announcement(&self, action: ClipAction) -> PeerClipMessage {
        PeerClipMessage {
            clip_id: self.id.to_string(),
            peer_id: self.owner.clone(),
            source_type: self.source_type,
            global_clock_start: self.global_clock_start,
            global_start_time: self.global_start_time,
            global_end_time: self.global_end_time,
            action,
        }
    }
}

/// Peer-announced view of a clip, never carries the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerClip {
    pub clip_id: ClipId,
    pub peer_id: PeerId,
    pub source_type: SourceType,
    pub global_clock_start: u64,
    pub global_start_time: i64,
    pub global_end_time: Option<i64>,
}

impl From<PeerClipMessage> for PeerClip {
    fn from(msg: PeerClipMessage) -> Self {
        Self {
            clip_id: msg.clip_id.into(),
            peer_id: msg.peer_id,
            source_type: msg.source_type,
            global_clock_start: msg.global_clock_start,
            global_start_time: msg.global_start_time,
            global_end_time: msg.global_end_time,
        }
    }
}
