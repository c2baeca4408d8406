//! In-process mesh
//!
//! Every member holds a direct link to every other member. Messages are
//! serialized to JSON on send and parsed on delivery, so the wire encoding is
//! exercised exactly as over a real data channel. An optional fixed latency is
//! applied per link while keeping each link FIFO.

use super::{MeshEvent, MeshTransport, Target};
use crate::channels::{WireMessage, MAX_MESSAGE_SIZE};
use crate::peer::PeerId;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Inbox = mpsc::UnboundedSender<(Instant, MeshEvent)>;

#[derive(Default)]
struct MeshInner {
    members: BTreeMap<PeerId, Inbox>,
}

/// Shared in-memory mesh that peers join and leave
#[derive(Clone)]
pub struct MemoryMesh {
    inner: Arc<Mutex<MeshInner>>,
    latency: Duration,
}

impl Default for MemoryMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMesh {
    /// Create an empty mesh with instant delivery
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Create an empty mesh with a fixed one-way latency per message
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeshInner::default())),
            latency,
        }
    }

    /// Connect a new peer to every current member
    ///
    /// Existing members observe `PeerJoined(peer_id)`; the newcomer observes
    /// `PeerJoined` for each existing member.
    ///
    /// # Errors
    ///
    /// Returns error if `peer_id` is already a member.
    pub fn join(
        &self,
        peer_id: PeerId,
    ) -> Result<(Arc<MemoryEndpoint>, mpsc::UnboundedReceiver<MeshEvent>)> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_with_latency(inbox_rx, event_tx));

        let mut inner = self.inner.lock();
        if inner.members.contains_key(&peer_id) {
            return Err(Error::TransportError(format!(
                "Peer {} already joined the mesh",
                peer_id
            )));
        }

        let now = Instant::now();
        for (existing, inbox) in inner.members.iter() {
            let _ = inbox.send((now, MeshEvent::PeerJoined(peer_id.clone())));
            let _ = inbox_tx.send((now, MeshEvent::PeerJoined(existing.clone())));
        }
        inner.members.insert(peer_id.clone(), inbox_tx);

        info!("Peer {} joined memory mesh ({} members)", peer_id, inner.members.len());

        let endpoint = Arc::new(MemoryEndpoint {
            local: peer_id,
            inner: Arc::clone(&self.inner),
            latency: self.latency,
        });
        Ok((endpoint, event_rx))
    }

    /// Disconnect a peer; remaining members observe `PeerLeft`
    pub fn leave(&self, peer_id: &PeerId) {
        let mut inner = self.inner.lock();
        if inner.members.remove(peer_id).is_none() {
            return;
        }

        let now = Instant::now();
        for inbox in inner.members.values() {
            let _ = inbox.send((now, MeshEvent::PeerLeft(peer_id.clone())));
        }
        info!("Peer {} left memory mesh", peer_id);
    }

    /// Current member ids
    pub fn members(&self) -> Vec<PeerId> {
        self.inner.lock().members.keys().cloned().collect()
    }
}

async fn forward_with_latency(
    mut inbox: mpsc::UnboundedReceiver<(Instant, MeshEvent)>,
    events: mpsc::UnboundedSender<MeshEvent>,
) {
    while let Some((deliver_at, event)) = inbox.recv().await {
        tokio::time::sleep_until(deliver_at).await;
        if events.send(event).is_err() {
            break;
        }
    }
}

/// One member's view of the [`MemoryMesh`]
pub struct MemoryEndpoint {
    local: PeerId,
    inner: Arc<Mutex<MeshInner>>,
    latency: Duration,
}

#[async_trait]
impl MeshTransport for MemoryEndpoint {
    fn local_peer_id(&self) -> &PeerId {
        &self.local
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let inner = self.inner.lock();
        if !inner.members.contains_key(&self.local) {
            return Vec::new();
        }
        inner
            .members
            .keys()
            .filter(|id| **id != self.local)
            .cloned()
            .collect()
    }

    async fn send(&self, target: Target, message: &WireMessage) -> Result<()> {
        let bytes = message.to_bytes()?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::TransportError(format!(
                "{} message of {} bytes exceeds maximum size",
                message.topic(),
                bytes.len()
            )));
        }

        let recipients: Vec<Inbox> = {
            let inner = self.inner.lock();
            if !inner.members.contains_key(&self.local) {
                return Err(Error::TransportError(format!(
                    "Peer {} is not connected to the mesh",
                    self.local
                )));
            }

            match &target {
                Target::All => inner
                    .members
                    .iter()
                    .filter(|(id, _)| **id != self.local)
                    .map(|(_, inbox)| inbox.clone())
                    .collect(),
                Target::Peer(id) => {
                    let inbox = inner
                        .members
                        .get(id)
                        .ok_or_else(|| Error::PeerNotFound(id.to_string()))?;
                    vec![inbox.clone()]
                }
            }
        };

        debug!(
            "{} -> {:?}: {} ({} bytes)",
            self.local,
            target,
            message.topic(),
            bytes.len()
        );

        let deliver_at = Instant::now() + self.latency;
        for inbox in recipients {
            let message = WireMessage::from_bytes(&bytes)?;
            let event = MeshEvent::Message {
                from: self.local.clone(),
                message,
            };
            if inbox.send((deliver_at, event)).is_err() {
                warn!("Dropping {} from {}: recipient gone", target_label(&target), self.local);
            }
        }

        Ok(())
    }
}

fn target_label(target: &Target) -> String {
    match target {
        Target::All => "broadcast".to_string(),
        Target::Peer(id) => format!("message to {}", id),
    }
}
