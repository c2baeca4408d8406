//! Peer-to-peer recording session coordination
//!
//! Several participants, each connected directly to every other, record a
//! session together without a server. This crate is the coordination layer
//! between them.
//!
//! # Features
//!
//! - **Clock sync**: NTP-style two-way exchange, median of 5 samples, host clock
//!   as the global time axis
//! - **Shared state**: last-writer-wins registers for focus, screen share and
//!   tile order, with host bootstrap for late joiners
//! - **Recording**: host-commanded countdown/start/stop, time-aligned clips,
//!   contiguous camera/audio-only swaps
//! - **Transfer**: paced 64 KiB chunks, SHA-256 end-to-end verification,
//!   bounded FIFO job queue
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SessionNode (one per participant)                   │
//! │  ├─ dispatcher task: MeshEvent → component handlers  │
//! │  ├─ ClockSyncService   (offset to host)              │
//! │  ├─ StateReconciler    (LWW registers)               │
//! │  ├─ RecordingCoordinator (clips, capture)            │
//! │  └─ TransferQueue → TransferSender / TransferReceiver│
//! │     ↓                                                │
//! │  MeshTransport (data channels, join/leave events)    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshcast_session::SessionConfig;
//!
//! let config = SessionConfig::from_toml_str(
//!     r#"
//!     [transfer]
//!     max_parallel = 2
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.transfer.max_parallel, 2);
//! assert_eq!(config.transfer.chunk_size, 64 * 1024);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use meshcast_session::{
//!     MemoryMesh, PeerIdentity, SessionConfig, SessionNode, SyntheticCapture, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> meshcast_session::Result<()> {
//! let mesh = MemoryMesh::new();
//! let (endpoint, events) = mesh.join("alice".into())?;
//!
//! let host = SessionNode::new(
//!     SessionConfig::default(),
//!     PeerIdentity::host_of("alice".into()),
//!     endpoint,
//!     Arc::new(SystemClock),
//!     Arc::new(SyntheticCapture::new("alice")),
//! )?;
//! host.run(events)?;
//!
//! host.start_recording().await?;
//! host.stop_recording().await?;
//! let manifest = host.compositor_manifest();
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod peer;
pub mod recording;
pub mod session;
pub mod state;
pub mod sync;
pub mod transfer;
pub mod transport;

pub use config::{ClockSyncConfig, RecordingConfig, SessionConfig, TransferConfig};
pub use error::{Error, Result};
pub use peer::{PeerId, PeerIdentity, PeerRef, SessionRole};
pub use recording::{
    CaptureService, CaptureStream, ClipId, ClipStatus, PeerClip, RecordingClip, RecordingState,
    SourceType, SyntheticCapture, Track,
};
pub use session::{CompositionClip, CompositorManifest, SessionEvent, SessionNode};
pub use state::{LwwRegister, SharedStateSnapshot};
pub use sync::{Clock, ManualClock, SkewedClock, SystemClock};
pub use transfer::{FailureKind, TransferJob, TransferStatus};
pub use transport::{MemoryMesh, MeshEvent, MeshTransport, Target};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
