//! Clock sync service
//!
//! Estimates `remote - local` clock offsets with repeated two-way exchanges
//! and keeps the latest estimate per peer. The host is the timing reference:
//! its own offset is 0 and it never samples anyone.

use super::clock::Clock;
use super::sample::{median_offset, ClockSample};
use crate::channels::{ClockSyncRequest, ClockSyncResponse, WireMessage};
use crate::config::ClockSyncConfig;
use crate::peer::{PeerId, PeerIdentity};
use crate::transport::{MeshTransport, Target};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type PendingKey = (PeerId, u64);

/// Per-peer clock offset estimator
pub struct ClockSyncService {
    identity: PeerIdentity,
    transport: Arc<dyn MeshTransport>,
    clock: Arc<dyn Clock>,
    config: ClockSyncConfig,

    /// Latest estimate per remote peer (`remote - local`, ms)
    offsets: RwLock<HashMap<PeerId, i64>>,

    /// Samples awaiting a reply, keyed by (peer, t1)
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<ClockSample>>>,

    /// One estimation batch at a time
    batch_lock: tokio::sync::Mutex<()>,
}

impl ClockSyncService {
    pub fn new(
        identity: PeerIdentity,
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
        config: ClockSyncConfig,
    ) -> Self {
        Self {
            identity,
            transport,
            clock,
            config,
            offsets: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            batch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Estimate and store the clock offset of `peer` relative to us
    ///
    /// Runs `config.samples` exchanges spaced `config.sample_spacing_ms`
    /// apart and keeps the median. A sample that gets no reply within
    /// `config.sample_timeout_ms` contributes 0, so an unreachable peer
    /// degrades to "assume synchronized" instead of failing.
    ///
    /// On the host this is a no-op returning 0.
    pub async fn estimate_offset(&self, peer: &PeerId) -> i64 {
        if self.identity.is_host() || peer == self.identity.local_id() {
            return 0;
        }

        let _batch = self.batch_lock.lock().await;

        let mut offsets = Vec::with_capacity(self.config.samples as usize);
        let mut answered = 0usize;
        for i in 0..self.config.samples {
            if i > 0 {
                tokio::time::sleep(self.config.sample_spacing()).await;
            }

            match self.sample_once(peer).await {
                Some(sample) => {
                    answered += 1;
                    debug!(
                        "Clock sample {} from {}: offset {}ms, rtt {}ms",
                        i,
                        peer,
                        sample.offset_ms(),
                        sample.round_trip_ms()
                    );
                    offsets.push(sample.offset_ms());
                }
                None => offsets.push(0),
            }
        }

        let offset = median_offset(&offsets);
        if answered == 0 {
            warn!(
                "No clock sync replies from {}, assuming synchronized clocks",
                peer
            );
        } else {
            info!(
                "Clock offset for {}: {}ms ({}/{} samples answered)",
                peer, offset, answered, self.config.samples
            );
        }

        self.offsets.write().insert(peer.clone(), offset);
        offset
    }

    /// Re-estimate the host offset; no-op on the host itself
    pub async fn refresh_host_offset(&self) -> i64 {
        let host = self.identity.host_id().clone();
        self.estimate_offset(&host).await
    }

    async fn sample_once(&self, peer: &PeerId) -> Option<ClockSample> {
        let t1 = self.clock.now_ms();
        let key = (peer.clone(), t1);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key.clone(), tx);

        let request = WireMessage::ClockSyncRequest(ClockSyncRequest {
            client_send_time: t1,
        });
        if let Err(e) = self.transport.send(Target::Peer(peer.clone()), &request).await {
            warn!("Failed to send clock sync request to {}: {}", peer, e);
            self.pending.lock().remove(&key);
            return None;
        }

        match tokio::time::timeout(self.config.sample_timeout(), rx).await {
            Ok(Ok(sample)) => Some(sample),
            _ => {
                self.pending.lock().remove(&key);
                warn!("Clock sync sample to {} timed out", peer);
                None
            }
        }
    }

    /// Answer a peer's clock request with our receive/send times
    pub async fn handle_request(&self, from: &PeerId, request: ClockSyncRequest) {
        let server_receive_time = self.clock.now_ms();
        let response = WireMessage::ClockSyncResponse(ClockSyncResponse {
            client_send_time: request.client_send_time,
            server_receive_time,
            server_send_time: self.clock.now_ms(),
        });

        if let Err(e) = self.transport.send(Target::Peer(from.clone()), &response).await {
            warn!("Failed to answer clock sync request from {}: {}", from, e);
        }
    }

    /// Complete the sample waiting on this reply
    pub fn handle_response(&self, from: &PeerId, response: ClockSyncResponse) {
        let t4 = self.clock.now_ms();
        let key = (from.clone(), response.client_send_time);

        match self.pending.lock().remove(&key) {
            Some(tx) => {
                let _ = tx.send(ClockSample {
                    t1: response.client_send_time,
                    t2: response.server_receive_time,
                    t3: response.server_send_time,
                    t4,
                });
            }
            None => debug!(
                "Ignoring late clock sync response from {} (t1={})",
                from, response.client_send_time
            ),
        }
    }

    /// Latest offset for `peer`, 0 if never estimated
    pub fn offset_for(&self, peer: &PeerId) -> i64 {
        if peer == self.identity.local_id() {
            return 0;
        }
        self.offsets.read().get(peer).copied().unwrap_or(0)
    }

    /// Offset of the host clock relative to ours; always 0 on the host
    pub fn host_offset(&self) -> i64 {
        if self.identity.is_host() {
            return 0;
        }
        self.offset_for(self.identity.host_id())
    }

    /// Convert a local clock reading onto the host's clock
    pub fn to_host_time(&self, local_ms: u64) -> i64 {
        local_ms as i64 + self.host_offset()
    }

    /// Current time on the host's clock, as best we know it
    pub fn host_now(&self) -> i64 {
        self.to_host_time(self.clock.now_ms())
    }

    /// Drop state for a departed peer
    pub fn forget(&self, peer: &PeerId) {
        self.offsets.write().remove(peer);
        self.pending.lock().retain(|(p, _), _| p != peer);
    }

    pub fn reset(&self) {
        self.offsets.write().clear();
        self.pending.lock().clear();
    }
}
