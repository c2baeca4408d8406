//! Wire message types
//!
//! Every message travels as one JSON object tagged with its topic name, e.g.
//! `{"topic":"focus-change","peerId":"alice","timestamp":1700000000000}`.
//! Peer ids in these payloads are always real mesh ids; see
//! [`crate::peer::PeerIdentity`] for the self-sentinel translation.

use crate::peer::PeerId;
use crate::recording::SourceType;
use serde::{Deserialize, Serialize};

/// Maximum encoded message size accepted from the mesh (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// All messages exchanged between session peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum WireMessage {
    ClockSyncRequest(ClockSyncRequest),
    ClockSyncResponse(ClockSyncResponse),
    FocusChange(FocusChange),
    TileOrder(TileOrder),
    ActiveScreenShare(ActiveScreenShare),
    Recording(RecordingMessage),
    PeerClip(PeerClipMessage),
    TransferMetadata(TransferMetadata),
    TransferChunk(TransferChunk),
    TransferAck(TransferAck),
    TransferError(TransferErrorMessage),
}

impl WireMessage {
    /// Topic name this message is published on
    pub fn topic(&self) -> &'static str {
        match self {
            WireMessage::ClockSyncRequest(_) => "clock-sync-request",
            WireMessage::ClockSyncResponse(_) => "clock-sync-response",
            WireMessage::FocusChange(_) => "focus-change",
            WireMessage::TileOrder(_) => "tile-order",
            WireMessage::ActiveScreenShare(_) => "active-screen-share",
            WireMessage::Recording(_) => "recording",
            WireMessage::PeerClip(_) => "peer-clip",
            WireMessage::TransferMetadata(_) => "transfer-metadata",
            WireMessage::TransferChunk(_) => "transfer-chunk",
            WireMessage::TransferAck(_) => "transfer-ack",
            WireMessage::TransferError(_) => "transfer-error",
        }
    }

    /// Serialize message to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Client side of a two-way clock exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSyncRequest {
    /// t1, client clock at send
    pub client_send_time: u64,
}

/// Host reply, echoing t1 for correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSyncResponse {
    pub client_send_time: u64,
    /// t2, host clock at receive
    pub server_receive_time: u64,
    /// t3, host clock at reply
    pub server_send_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusChange {
    pub peer_id: Option<PeerId>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileOrder {
    pub order: Vec<PeerId>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveScreenShare {
    pub peer_id: Option<PeerId>,
    pub timestamp: u64,
}

/// Host-issued recording commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RecordingMessage {
    /// Guests refresh their clock offset
    PreSync,
    /// One countdown tick (3, 2, 1)
    Countdown { countdown: u32 },
    /// Begin capture; the host's clock at start is the global origin
    Start {
        #[serde(rename = "globalClockStart")]
        global_clock_start: u64,
    },
    /// Stop all active clips
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipAction {
    Started,
    Stopped,
}

/// Announcement of a clip lifecycle transition, without payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerClipMessage {
    pub clip_id: String,
    pub peer_id: PeerId,
    pub source_type: SourceType,
    /// Origin of the take the clip belongs to
    pub global_clock_start: u64,
    pub global_start_time: i64,
    pub global_end_time: Option<i64>,
    pub action: ClipAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    /// SHA-256 of the whole payload, lowercase hex
    pub hash: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunk {
    pub id: String,
    pub index: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAck {
    pub id: String,
    pub received_chunks: u32,
    pub complete: bool,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorMessage {
    pub id: String,
    pub message: String,
}

/// Custom serialization for binary data as base64
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
