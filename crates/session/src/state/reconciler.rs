//! Shared state reconciler
//!
//! Keeps the focused participant, the active screen-share presenter and the
//! tile order consistent across the mesh with one [`LwwRegister`] each.

use super::register::LwwRegister;
use crate::channels::{ActiveScreenShare, FocusChange, TileOrder, WireMessage};
use crate::peer::{PeerId, PeerIdentity, PeerRef};
use crate::sync::Clock;
use crate::transport::{MeshTransport, Target};
use crate::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// One applied focus change, for the compositor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRecord {
    pub peer_id: Option<PeerId>,
    pub timestamp: u64,
}

/// Point-in-time view of all shared values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedStateSnapshot {
    pub focused_peer: Option<PeerRef>,
    pub focused_at: u64,
    pub screen_share_peer: Option<PeerRef>,
    pub screen_share_at: u64,
    pub tile_order: Vec<PeerRef>,
    pub tile_order_at: u64,
}

struct ReconcilerState {
    focus: LwwRegister<Option<PeerRef>>,
    screen_share: LwwRegister<Option<PeerRef>>,
    tile_order: LwwRegister<Vec<PeerRef>>,
    /// Connected remote peers in join order
    connected: Vec<PeerId>,
    focus_history: Vec<FocusRecord>,
}

impl ReconcilerState {
    fn new() -> Self {
        Self {
            focus: LwwRegister::new(None),
            screen_share: LwwRegister::new(None),
            tile_order: LwwRegister::new(vec![PeerRef::Local]),
            connected: Vec::new(),
            focus_history: Vec::new(),
        }
    }

    /// Exactly one tile for self and for every connected peer
    ///
    /// Duplicates and ids that are not connected are dropped; a peer that
    /// connects later gets its tile appended on join.
    fn normalize_tiles(&mut self) {
        let connected = self.connected.clone();
        self.tile_order.adjust(|order| {
            let mut seen = Vec::with_capacity(order.len());
            order.retain(|p| {
                let present = match p {
                    PeerRef::Local => true,
                    PeerRef::Remote(id) => connected.contains(id),
                };
                if !present || seen.contains(p) {
                    false
                } else {
                    seen.push(p.clone());
                    true
                }
            });
            if !order.contains(&PeerRef::Local) {
                order.push(PeerRef::Local);
            }
            for id in connected {
                let peer = PeerRef::Remote(id);
                if !order.contains(&peer) {
                    order.push(peer);
                }
            }
        });
    }
}

/// Last-writer-wins reconciliation of the session's shared UI state
pub struct StateReconciler {
    identity: PeerIdentity,
    transport: Arc<dyn MeshTransport>,
    clock: Arc<dyn Clock>,
    state: RwLock<ReconcilerState>,
}

impl StateReconciler {
    pub fn new(
        identity: PeerIdentity,
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            transport,
            clock,
            state: RwLock::new(ReconcilerState::new()),
        }
    }

    fn focus_message(&self, value: &Option<PeerRef>, timestamp: u64) -> WireMessage {
        WireMessage::FocusChange(FocusChange {
            peer_id: self.identity.to_wire_opt(value.as_ref()),
            timestamp,
        })
    }

    fn screen_share_message(&self, value: &Option<PeerRef>, timestamp: u64) -> WireMessage {
        WireMessage::ActiveScreenShare(ActiveScreenShare {
            peer_id: self.identity.to_wire_opt(value.as_ref()),
            timestamp,
        })
    }

    fn tile_order_message(&self, order: &[PeerRef], timestamp: u64) -> WireMessage {
        WireMessage::TileOrder(TileOrder {
            order: self.identity.to_wire_list(order),
            timestamp,
        })
    }

    /// Focus a participant (or clear focus) and broadcast the write
    pub async fn set_focus(&self, peer: Option<PeerRef>) -> Result<()> {
        let now = self.clock.now_ms();
        let message = {
            let mut state = self.state.write();
            let timestamp = state.focus.set(peer.clone(), now);
            state.focus_history.push(FocusRecord {
                peer_id: self.identity.to_wire_opt(peer.as_ref()),
                timestamp,
            });
            self.focus_message(&peer, timestamp)
        };
        debug!("Local focus -> {:?}", peer);
        self.transport.send(Target::All, &message).await
    }

    /// Mark a participant as the active presenter (or clear it) and broadcast
    pub async fn set_screen_share(&self, peer: Option<PeerRef>) -> Result<()> {
        let now = self.clock.now_ms();
        let message = {
            let mut state = self.state.write();
            let timestamp = state.screen_share.set(peer.clone(), now);
            self.screen_share_message(&peer, timestamp)
        };
        debug!("Local screen share -> {:?}", peer);
        self.transport.send(Target::All, &message).await
    }

    /// Reorder tiles and broadcast the new order
    pub async fn set_tile_order(&self, order: Vec<PeerRef>) -> Result<()> {
        let now = self.clock.now_ms();
        let message = {
            let mut state = self.state.write();
            let timestamp = state.tile_order.set(order, now);
            state.normalize_tiles();
            self.tile_order_message(state.tile_order.value(), timestamp)
        };
        self.transport.send(Target::All, &message).await
    }

    /// Apply a peer's focus write if newer; returns whether it was applied
    pub fn on_focus_change(&self, from: &PeerId, update: FocusChange) -> bool {
        let value = self.identity.from_wire_opt(update.peer_id.clone());
        let mut state = self.state.write();
        if state.focus.apply(value, update.timestamp) {
            state.focus_history.push(FocusRecord {
                peer_id: update.peer_id,
                timestamp: update.timestamp,
            });
            true
        } else {
            debug!(
                "Dropping stale focus-change from {} (ts {} <= {})",
                from,
                update.timestamp,
                state.focus.timestamp()
            );
            false
        }
    }

    pub fn on_screen_share(&self, from: &PeerId, update: ActiveScreenShare) -> bool {
        let value = self.identity.from_wire_opt(update.peer_id);
        let mut state = self.state.write();
        let applied = state.screen_share.apply(value, update.timestamp);
        if !applied {
            debug!(
                "Dropping stale active-screen-share from {} (ts {} <= {})",
                from,
                update.timestamp,
                state.screen_share.timestamp()
            );
        }
        applied
    }

    pub fn on_tile_order(&self, from: &PeerId, update: TileOrder) -> bool {
        let order = self.identity.from_wire_list(update.order);
        let mut state = self.state.write();
        if state.tile_order.apply(order, update.timestamp) {
            state.normalize_tiles();
            true
        } else {
            debug!(
                "Dropping stale tile-order from {} (ts {} <= {})",
                from,
                update.timestamp,
                state.tile_order.timestamp()
            );
            false
        }
    }

    /// Structural join handling, plus the host's bootstrap push
    ///
    /// The newcomer gets a tile at the end. If we are the host, the newcomer
    /// also receives every shared value re-stamped with a fresh timestamp, so
    /// it beats the newcomer's sentinels. Guests stay silent here.
    pub async fn on_peer_joined(&self, peer: &PeerId) -> Result<()> {
        let bootstrap = {
            let mut state = self.state.write();
            if !state.connected.contains(peer) {
                state.connected.push(peer.clone());
            }
            state.normalize_tiles();

            if self.identity.is_host() {
                let now = self.clock.now_ms();
                let focus_ts = state.focus.restamp(now);
                let share_ts = state.screen_share.restamp(now);
                let tiles_ts = state.tile_order.restamp(now);
                Some([
                    self.focus_message(state.focus.value(), focus_ts),
                    self.screen_share_message(state.screen_share.value(), share_ts),
                    self.tile_order_message(state.tile_order.value(), tiles_ts),
                ])
            } else {
                None
            }
        };

        if let Some(messages) = bootstrap {
            info!("Bootstrapping shared state for {}", peer);
            for message in &messages {
                self.transport
                    .send(Target::Peer(peer.clone()), message)
                    .await?;
            }
        }
        Ok(())
    }

    /// Drop a departed peer's tile; timestamp untouched
    pub fn on_peer_left(&self, peer: &PeerId) {
        let mut state = self.state.write();
        state.connected.retain(|p| p != peer);
        let departed = PeerRef::Remote(peer.clone());
        state.tile_order.adjust(|order| order.retain(|p| *p != departed));
    }

    pub fn focused_peer(&self) -> Option<PeerRef> {
        self.state.read().focus.value().clone()
    }

    pub fn screen_share_peer(&self) -> Option<PeerRef> {
        self.state.read().screen_share.value().clone()
    }

    pub fn tile_order(&self) -> Vec<PeerRef> {
        self.state.read().tile_order.value().clone()
    }

    pub fn snapshot(&self) -> SharedStateSnapshot {
        let state = self.state.read();
        SharedStateSnapshot {
            focused_peer: state.focus.value().clone(),
            focused_at: state.focus.timestamp(),
            screen_share_peer: state.screen_share.value().clone(),
            screen_share_at: state.screen_share.timestamp(),
            tile_order: state.tile_order.value().clone(),
            tile_order_at: state.tile_order.timestamp(),
        }
    }

    /// Applied focus changes ordered by timestamp
    pub fn focus_history(&self) -> Vec<FocusRecord> {
        let mut history = self.state.read().focus_history.clone();
        history.sort_by_key(|r| r.timestamp);
        history
    }

    /// Back to defaults, as on leaving the session
    pub fn reset(&self) {
        *self.state.write() = ReconcilerState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SENTINEL_TIMESTAMP;
    use crate::sync::ManualClock;
    use crate::transport::{MemoryMesh, MeshEvent};
    use tokio::sync::mpsc;

    struct Peer {
        reconciler: StateReconciler,
        clock: Arc<ManualClock>,
        events: mpsc::UnboundedReceiver<MeshEvent>,
    }

    fn join(mesh: &MemoryMesh, id: &str, host: &str, now: u64) -> Peer {
        let (ep, events) = mesh.join(id.into()).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        Peer {
            reconciler: StateReconciler::new(
                PeerIdentity::new(id.into(), host.into()),
                ep,
                clock.clone(),
            ),
            clock,
            events,
        }
    }

    /// Feed every queued event into the peer's reconciler
    async fn drain(peer: &mut Peer) {
        while let Ok(event) = peer.events.try_recv() {
            match event {
                MeshEvent::PeerJoined(id) => peer.reconciler.on_peer_joined(&id).await.unwrap(),
                MeshEvent::PeerLeft(id) => peer.reconciler.on_peer_left(&id),
                MeshEvent::Message { from, message } => match message {
                    WireMessage::FocusChange(m) => {
                        peer.reconciler.on_focus_change(&from, m);
                    }
                    WireMessage::ActiveScreenShare(m) => {
                        peer.reconciler.on_screen_share(&from, m);
                    }
                    WireMessage::TileOrder(m) => {
                        peer.reconciler.on_tile_order(&from, m);
                    }
                    _ => {}
                },
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_local_write_broadcasts_real_id() {
        let mesh = MemoryMesh::new();
        let mut host = join(&mesh, "host", "host", 100);
        let mut guest = join(&mesh, "guest", "host", 100);
        settle().await;
        drain(&mut host).await;
        drain(&mut guest).await;

        host.reconciler.set_focus(Some(PeerRef::Local)).await.unwrap();
        settle().await;
        drain(&mut guest).await;

        // "self" on the host is the host's real id on the guest
        assert_eq!(
            guest.reconciler.focused_peer(),
            Some(PeerRef::Remote("host".into()))
        );
        assert_eq!(host.reconciler.focused_peer(), Some(PeerRef::Local));
    }

    #[tokio::test]
    async fn test_own_id_on_the_wire_maps_to_self() {
        let mesh = MemoryMesh::new();
        let guest = join(&mesh, "guest", "host", 100);

        let applied = guest.reconciler.on_focus_change(
            &"host".into(),
            FocusChange {
                peer_id: Some("guest".into()),
                timestamp: 500,
            },
        );
        assert!(applied);
        assert_eq!(guest.reconciler.focused_peer(), Some(PeerRef::Local));
    }

    #[tokio::test]
    async fn test_stale_remote_update_dropped() {
        let mesh = MemoryMesh::new();
        let guest = join(&mesh, "guest", "host", 100);

        assert!(guest.reconciler.on_screen_share(
            &"host".into(),
            ActiveScreenShare {
                peer_id: Some("host".into()),
                timestamp: 300
            }
        ));
        assert!(!guest.reconciler.on_screen_share(
            &"carol".into(),
            ActiveScreenShare {
                peer_id: Some("carol".into()),
                timestamp: 200
            }
        ));
        assert_eq!(
            guest.reconciler.screen_share_peer(),
            Some(PeerRef::Remote("host".into()))
        );
    }

    #[tokio::test]
    async fn test_bootstrap_late_joiner_sees_host_focus() {
        let mesh = MemoryMesh::new();
        let mut host = join(&mesh, "host", "host", 50);
        let mut a = join(&mesh, "a", "host", 50);
        settle().await;
        drain(&mut host).await;
        drain(&mut a).await;

        host.clock.set(100);
        host.reconciler
            .set_focus(Some(PeerRef::Remote("a".into())))
            .await
            .unwrap();
        settle().await;
        drain(&mut a).await;

        // B joins afterwards and never writes focus itself
        host.clock.set(2_000);
        let mut b = join(&mesh, "b", "host", 10);
        assert_eq!(b.reconciler.snapshot().focused_at, SENTINEL_TIMESTAMP);
        settle().await;
        drain(&mut host).await;
        drain(&mut a).await;
        settle().await;
        drain(&mut b).await;

        assert_eq!(
            b.reconciler.focused_peer(),
            Some(PeerRef::Remote("a".into()))
        );
        assert_eq!(b.reconciler.snapshot().focused_at, 2_000);
        // A stays where it was: only the host pushed, and only to B
        assert_eq!(a.reconciler.focused_peer(), Some(PeerRef::Local));
    }

    #[tokio::test]
    async fn test_guest_does_not_bootstrap() {
        let mesh = MemoryMesh::new();
        let mut guest = join(&mesh, "guest", "host", 100);
        guest.reconciler.set_focus(Some(PeerRef::Local)).await.unwrap();

        let mut late = join(&mesh, "late", "host", 100);
        settle().await;
        drain(&mut guest).await;
        settle().await;

        assert_eq!(
            late.events.try_recv().ok(),
            Some(MeshEvent::PeerJoined("guest".into()))
        );
        assert!(late.events.try_recv().is_err(), "guest must stay silent on join");
    }

    #[tokio::test]
    async fn test_tile_order_splices_joins_and_leaves() {
        let mesh = MemoryMesh::new();
        let mut guest = join(&mesh, "guest", "host", 100);
        let _host = join(&mesh, "host", "host", 100);
        let _carol = join(&mesh, "carol", "host", 100);
        settle().await;
        drain(&mut guest).await;

        assert_eq!(
            guest.reconciler.tile_order(),
            vec![
                PeerRef::Local,
                PeerRef::Remote("host".into()),
                PeerRef::Remote("carol".into())
            ]
        );
        let before = guest.reconciler.snapshot().tile_order_at;

        // Repeated membership churn is idempotent and never bumps the stamp
        guest.reconciler.on_peer_joined(&"carol".into()).await.unwrap();
        guest.reconciler.on_peer_left(&"host".into());
        guest.reconciler.on_peer_left(&"host".into());
        assert_eq!(
            guest.reconciler.tile_order(),
            vec![PeerRef::Local, PeerRef::Remote("carol".into())]
        );
        assert_eq!(guest.reconciler.snapshot().tile_order_at, before);
    }

    #[tokio::test]
    async fn test_remote_tile_order_is_normalized() {
        let mesh = MemoryMesh::new();
        let mut guest = join(&mesh, "guest", "host", 100);
        let _host = join(&mesh, "host", "host", 100);
        let _carol = join(&mesh, "carol", "host", 100);
        settle().await;
        drain(&mut guest).await;

        // Sender did not know about carol yet and listed the guest twice
        assert!(guest.reconciler.on_tile_order(
            &"host".into(),
            TileOrder {
                order: vec!["guest".into(), "host".into(), "guest".into()],
                timestamp: 900,
            }
        ));
        assert_eq!(
            guest.reconciler.tile_order(),
            vec![
                PeerRef::Local,
                PeerRef::Remote("host".into()),
                PeerRef::Remote("carol".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_tile_order_never_restores_departed_peer() {
        let mesh = MemoryMesh::new();
        let mut guest = join(&mesh, "guest", "host", 100);
        let _host = join(&mesh, "host", "host", 100);
        let carol = join(&mesh, "carol", "host", 100);
        settle().await;
        drain(&mut guest).await;

        drop(carol);
        mesh.leave(&"carol".into());
        settle().await;
        drain(&mut guest).await;
        assert_eq!(
            guest.reconciler.tile_order(),
            vec![PeerRef::Local, PeerRef::Remote("host".into())]
        );

        // A writer that has not seen the leave yet still lists carol
        assert!(guest.reconciler.on_tile_order(
            &"host".into(),
            TileOrder {
                order: vec!["carol".into(), "host".into(), "guest".into()],
                timestamp: 900,
            }
        ));
        assert_eq!(
            guest.reconciler.tile_order(),
            vec![PeerRef::Remote("host".into()), PeerRef::Local]
        );

        guest.clock.set(1_000);
        guest
            .reconciler
            .set_tile_order(vec![
                PeerRef::Remote("carol".into()),
                PeerRef::Local,
                PeerRef::Remote("host".into()),
            ])
            .await
            .unwrap();
        assert_eq!(
            guest.reconciler.tile_order(),
            vec![PeerRef::Local, PeerRef::Remote("host".into())]
        );
    }

    #[tokio::test]
    async fn test_focus_history_and_reset() {
        let mesh = MemoryMesh::new();
        let guest = join(&mesh, "guest", "host", 100);

        guest.reconciler.on_focus_change(
            &"host".into(),
            FocusChange {
                peer_id: Some("host".into()),
                timestamp: 300,
            },
        );
        guest.reconciler.on_focus_change(
            &"host".into(),
            FocusChange {
                peer_id: None,
                timestamp: 200,
            },
        );
        guest.reconciler.on_focus_change(
            &"host".into(),
            FocusChange {
                peer_id: Some("guest".into()),
                timestamp: 400,
            },
        );

        let history = guest.reconciler.focus_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, 300);
        assert_eq!(history[1].peer_id, Some("guest".into()));

        guest.reconciler.reset();
        assert!(guest.reconciler.focus_history().is_empty());
        assert_eq!(guest.reconciler.focused_peer(), None);
        assert_eq!(guest.reconciler.tile_order(), vec![PeerRef::Local]);
    }
}
