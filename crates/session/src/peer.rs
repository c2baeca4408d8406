//! Peer identity and the local self sentinel
//!
//! Inside a peer, its own participant is always [`PeerRef::Local`], never its
//! mesh-assigned id. Wire payloads only ever carry real ids. Every send and
//! receive site goes through [`PeerIdentity::to_wire`] /
//! [`PeerIdentity::from_wire`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable mesh identifier assigned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// In-memory reference to a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRef {
    /// The local participant
    Local,
    /// Any other participant
    Remote(PeerId),
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRef::Local => f.write_str("self"),
            PeerRef::Remote(id) => write!(f, "{}", id),
        }
    }
}

/// Whether this peer created the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Timing reference, bootstrap authority, recording commander
    Host,
    /// Every other participant
    Guest,
}

/// Local and host ids plus the self-sentinel translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    local: PeerId,
    host: PeerId,
}

impl PeerIdentity {
    pub fn new(local: PeerId, host: PeerId) -> Self {
        Self { local, host }
    }

    /// Identity of the peer that created the session
    pub fn host_of(local: PeerId) -> Self {
        Self {
            host: local.clone(),
            local,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    pub fn host_id(&self) -> &PeerId {
        &self.host
    }

    pub fn role(&self) -> SessionRole {
        if self.local == self.host {
            SessionRole::Host
        } else {
            SessionRole::Guest
        }
    }

    pub fn is_host(&self) -> bool {
        self.role() == SessionRole::Host
    }

    /// Sentinel -> real id, for outgoing payloads
    pub fn to_wire(&self, peer: &PeerRef) -> PeerId {
        match peer {
            PeerRef::Local => self.local.clone(),
            PeerRef::Remote(id) => id.clone(),
        }
    }

    /// Real id -> sentinel, for incoming payloads
    pub fn from_wire(&self, id: PeerId) -> PeerRef {
        if id == self.local {
            PeerRef::Local
        } else {
            PeerRef::Remote(id)
        }
    }

    pub fn to_wire_opt(&self, peer: Option<&PeerRef>) -> Option<PeerId> {
        peer.map(|p| self.to_wire(p))
    }

    pub fn from_wire_opt(&self, id: Option<PeerId>) -> Option<PeerRef> {
        id.map(|id| self.from_wire(id))
    }

    pub fn to_wire_list(&self, peers: &[PeerRef]) -> Vec<PeerId> {
        peers.iter().map(|p| self.to_wire(p)).collect()
    }

    pub fn from_wire_list(&self, ids: Vec<PeerId>) -> Vec<PeerRef> {
        ids.into_iter().map(|id| self.from_wire(id)).collect()
    }
}
