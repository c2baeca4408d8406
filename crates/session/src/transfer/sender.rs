//! Sending side of the chunked transfer protocol

use super::chunk::{content_hash, split_chunks};
use crate::channels::{TransferAck, TransferChunk, TransferErrorMessage, TransferMetadata, WireMessage};
use crate::config::TransferConfig;
use crate::peer::PeerId;
use crate::transport::{MeshTransport, Target};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type TransferKey = (PeerId, String);

#[derive(Debug)]
enum Reply {
    Ack(TransferAck),
    Rejected(String),
}

/// Sends payloads to peers and waits for their verdict
pub struct TransferSender {
    transport: Arc<dyn MeshTransport>,
    config: TransferConfig,
    awaiting: Mutex<HashMap<TransferKey, oneshot::Sender<Reply>>>,
}

impl TransferSender {
    pub fn new(transport: Arc<dyn MeshTransport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            awaiting: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver `data` to `peer` as transfer `id`
    ///
    /// Sends `transfer-metadata`, then every chunk in order with a pause
    /// after each `pacing_interval_chunks` chunks, then waits up to
    /// `ack_timeout_ms` for the receiver. `progress` is called with the
    /// fraction of chunks sent.
    ///
    /// # Errors
    ///
    /// - [`Error::TransferTimeout`] if no ack arrives in time
    /// - [`Error::TransferRejected`] if the receiver reports an error
    /// - [`Error::IntegrityMismatch`] if the ack carries a different hash
    pub async fn send_file<F>(
        &self,
        peer: &PeerId,
        id: &str,
        filename: &str,
        mime_type: &str,
        data: &[u8],
        progress: F,
    ) -> Result<()>
    where
        F: Fn(f32) + Send + Sync,
    {
        let hash = content_hash(data);
        let chunks = split_chunks(data, self.config.chunk_size);
        let key = (peer.clone(), id.to_string());

        let (tx, rx) = oneshot::channel();
        if self.awaiting.lock().insert(key.clone(), tx).is_some() {
            debug!("Restarting transfer {} to {}", id, peer);
        }

        let result = self
            .send_chunks(peer, id, filename, mime_type, data.len(), &hash, &chunks, &progress)
            .await;
        if let Err(e) = result {
            self.awaiting.lock().remove(&key);
            return Err(e);
        }

        let reply = tokio::time::timeout(self.config.ack_timeout(), rx).await;
        self.awaiting.lock().remove(&key);

        match reply {
            Ok(Ok(Reply::Ack(ack))) if ack.hash == hash => {
                info!("Transfer {} to {} acknowledged ({} bytes)", id, peer, data.len());
                progress(1.0);
                Ok(())
            }
            Ok(Ok(Reply::Ack(ack))) => Err(Error::IntegrityMismatch {
                expected: hash,
                actual: ack.hash,
            }),
            Ok(Ok(Reply::Rejected(message))) => Err(Error::TransferRejected(message)),
            Ok(Err(_)) => Err(Error::ChannelClosed(format!(
                "Transfer {} to {} abandoned",
                id, peer
            ))),
            Err(_) => Err(Error::TransferTimeout(format!(
                "No ack for {} from {} within {}ms",
                id, peer, self.config.ack_timeout_ms
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_chunks<F>(
        &self,
        peer: &PeerId,
        id: &str,
        filename: &str,
        mime_type: &str,
        size: usize,
        hash: &str,
        chunks: &[&[u8]],
        progress: &F,
    ) -> Result<()>
    where
        F: Fn(f32) + Send + Sync,
    {
        let target = Target::Peer(peer.clone());
        let total_chunks = chunks.len() as u32;

        let metadata = WireMessage::TransferMetadata(TransferMetadata {
            id: id.to_string(),
            filename: filename.to_string(),
            size: size as u64,
            mime_type: mime_type.to_string(),
            hash: hash.to_string(),
            total_chunks,
        });
        self.transport.send(target.clone(), &metadata).await?;
        debug!(
            "Sending {} to {}: {} bytes in {} chunk(s)",
            filename, peer, size, total_chunks
        );

        let pacing_delay = self.config.pacing_delay();
        let interval = self.config.pacing_interval_chunks.max(1);
        for (index, chunk) in chunks.iter().enumerate() {
            let index = index as u32;
            let message = WireMessage::TransferChunk(TransferChunk {
                id: id.to_string(),
                index,
                data: chunk.to_vec(),
            });
            self.transport.send(target.clone(), &message).await?;

            let sent = index + 1;
            progress(sent as f32 / total_chunks as f32);

            if sent % interval == 0 && sent < total_chunks && !pacing_delay.is_zero() {
                tokio::time::sleep(pacing_delay).await;
            }
        }
        Ok(())
    }

    /// Route a receiver's ack to the waiting transfer
    pub fn handle_ack(&self, from: &PeerId, ack: TransferAck) {
        if !ack.complete {
            debug!(
                "Transfer {} at {}: {} chunk(s) received",
                ack.id, from, ack.received_chunks
            );
            return;
        }

        let key = (from.clone(), ack.id.clone());
        match self.awaiting.lock().remove(&key) {
            Some(tx) => {
                let _ = tx.send(Reply::Ack(ack));
            }
            None => debug!("Ignoring ack for unknown transfer {} from {}", ack.id, from),
        }
    }

    /// Route a receiver's `transfer-error` to the waiting transfer
    pub fn handle_error(&self, from: &PeerId, error: TransferErrorMessage) {
        warn!("Transfer {} rejected by {}: {}", error.id, from, error.message);
        let key = (from.clone(), error.id);
        if let Some(tx) = self.awaiting.lock().remove(&key) {
            let _ = tx.send(Reply::Rejected(error.message));
        }
    }

    /// Abandon every transfer waiting on `peer`
    pub fn cancel_peer(&self, peer: &PeerId) {
        self.awaiting.lock().retain(|(p, _), _| p != peer);
    }

    pub fn cancel_all(&self) {
        self.awaiting.lock().clear();
    }
}
