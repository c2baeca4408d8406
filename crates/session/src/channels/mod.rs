//! Mesh message channels
//!
//! Topic-tagged wire messages for clock sync, shared state, recording
//! control, clip announcements and chunked transfers.

pub mod messages;

pub use messages::{
    ActiveScreenShare, ClipAction, ClockSyncRequest, ClockSyncResponse, FocusChange,
    PeerClipMessage, RecordingMessage, TileOrder, TransferAck, TransferChunk,
    TransferErrorMessage, TransferMetadata, WireMessage, MAX_MESSAGE_SIZE,
};
