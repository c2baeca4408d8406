//! Time-aligned local recording
//!
//! Each peer records its own sources. The host commands start and stop for
//! everyone; every clip transition is announced so all peers share a
//! payload-free view of the session timeline.

mod capture;
mod clip;
mod coordinator;

pub use capture::{CaptureService, CaptureStream, SyntheticCapture};
pub use clip::{ClipId, ClipStatus, PeerClip, RecordingClip, SourceType, Track};
pub use coordinator::{RecordingCoordinator, RecordingEvent, RecordingState};
