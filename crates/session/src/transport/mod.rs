//! Mesh transport abstraction
//!
//! The session layer never talks to sockets. It needs a per-topic
//! publish/subscribe data channel between directly connected peers plus
//! join/leave lifecycle events, which is exactly what [`MeshTransport`] and
//! [`MeshEvent`] describe. [`MemoryMesh`] is an in-process implementation used
//! by tests and the demo node.

mod memory;

pub use memory::{MemoryEndpoint, MemoryMesh};

use crate::channels::WireMessage;
use crate::peer::PeerId;
use crate::Result;
use async_trait::async_trait;

/// Recipient selector for an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every directly connected peer
    All,
    /// One specific peer
    Peer(PeerId),
}

/// Event surfaced by the transport to the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A message arrived from a connected peer
    Message { from: PeerId, message: WireMessage },
    /// A peer connected to us
    PeerJoined(PeerId),
    /// A peer disconnected
    PeerLeft(PeerId),
}

/// Peer-to-peer data channel between directly connected peers
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Mesh-assigned id of the local peer
    fn local_peer_id(&self) -> &PeerId;

    /// Ids of all currently connected remote peers
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Publish `message` on its topic to `target`
    async fn send(&self, target: Target, message: &WireMessage) -> Result<()>;
}
