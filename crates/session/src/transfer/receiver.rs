//! Receiving side of the chunked transfer protocol

use super::chunk::{content_hash, ReassemblyBuffer};
use crate::channels::{TransferAck, TransferChunk, TransferErrorMessage, TransferMetadata, WireMessage};
use crate::peer::PeerId;
use crate::transport::{MeshTransport, Target};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A verified payload delivered by a peer
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPayload {
    pub from: PeerId,
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub hash: String,
    pub data: Bytes,
}

struct Incoming {
    metadata: TransferMetadata,
    buffer: ReassemblyBuffer,
}

/// Reassembles incoming transfers and verifies them end to end
pub struct TransferReceiver {
    transport: Arc<dyn MeshTransport>,
    max_incoming_size: u64,
    incoming: Mutex<HashMap<(PeerId, String), Incoming>>,
}

impl TransferReceiver {
    pub fn new(transport: Arc<dyn MeshTransport>, max_incoming_size: u64) -> Self {
        Self {
            transport,
            max_incoming_size,
            incoming: Mutex::new(HashMap::new()),
        }
    }

    /// Open a pre-sized buffer for an announced transfer
    ///
    /// A metadata message for an id already in progress restarts it.
    pub async fn handle_metadata(&self, from: &PeerId, metadata: TransferMetadata) {
        if metadata.size > self.max_incoming_size {
            warn!(
                "Rejecting transfer {} from {}: {} bytes exceeds limit of {}",
                metadata.id, from, metadata.size, self.max_incoming_size
            );
            self.reject(from, &metadata.id, "payload too large").await;
            return;
        }

        let max_chunks = metadata.size.max(1);
        if metadata.total_chunks == 0 || metadata.total_chunks as u64 > max_chunks {
            warn!(
                "Rejecting transfer {} from {}: {} chunks for {} bytes",
                metadata.id, from, metadata.total_chunks, metadata.size
            );
            self.reject(from, &metadata.id, "invalid chunk count").await;
            return;
        }

        debug!(
            "Incoming transfer {} from {}: {} ({} bytes, {} chunks)",
            metadata.id, from, metadata.filename, metadata.size, metadata.total_chunks
        );
        let key = (from.clone(), metadata.id.clone());
        let buffer = ReassemblyBuffer::new(metadata.total_chunks, metadata.size);
        if self
            .incoming
            .lock()
            .insert(key, Incoming { metadata, buffer })
            .is_some()
        {
            info!("Transfer restarted by {}, partial buffer discarded", from);
        }
    }

    /// Store one chunk; on the last one verify and acknowledge
    ///
    /// Returns the payload once it is complete and its hash matches.
    ///
    /// # Errors
    ///
    /// [`Error::IntegrityMismatch`] when the reassembled bytes do not hash to
    /// the announced value. The sender is told with `transfer-error` and no
    /// completion ack is sent.
    pub async fn handle_chunk(
        &self,
        from: &PeerId,
        chunk: TransferChunk,
    ) -> Result<Option<ReceivedPayload>> {
        let finished = {
            let mut incoming = self.incoming.lock();
            let key = (from.clone(), chunk.id.clone());
            let Some(entry) = incoming.get_mut(&key) else {
                debug!("Chunk {} for unknown transfer {} from {}", chunk.index, chunk.id, from);
                return Ok(None);
            };
            if !entry.buffer.insert(chunk.index, chunk.data) {
                debug!("Ignoring chunk {} of {} from {}", chunk.index, chunk.id, from);
                return Ok(None);
            }
            if !entry.buffer.is_complete() {
                return Ok(None);
            }
            incoming.remove(&key)
        };
        let Some(Incoming { metadata, buffer }) = finished else {
            return Ok(None);
        };

        let data = match buffer.finish() {
            Ok(data) => data,
            Err(e) => {
                self.reject(from, &metadata.id, &e.to_string()).await;
                return Err(e);
            }
        };

        let actual = content_hash(&data);
        if actual != metadata.hash {
            warn!(
                "Transfer {} from {} is corrupt: expected {}, got {}",
                metadata.id, from, metadata.hash, actual
            );
            self.reject(
                from,
                &metadata.id,
                &format!("Integrity mismatch: expected {}, got {}", metadata.hash, actual),
            )
            .await;
            return Err(Error::IntegrityMismatch {
                expected: metadata.hash,
                actual,
            });
        }

        let ack = WireMessage::TransferAck(TransferAck {
            id: metadata.id.clone(),
            received_chunks: metadata.total_chunks,
            complete: true,
            hash: actual.clone(),
        });
        if let Err(e) = self.transport.send(Target::Peer(from.clone()), &ack).await {
            warn!("Failed to ack transfer {} to {}: {}", metadata.id, from, e);
        }

        info!(
            "Received {} from {} ({} bytes, verified)",
            metadata.filename,
            from,
            data.len()
        );
        Ok(Some(ReceivedPayload {
            from: from.clone(),
            id: metadata.id,
            filename: metadata.filename,
            mime_type: metadata.mime_type,
            hash: actual,
            data: Bytes::from(data),
        }))
    }

    async fn reject(&self, to: &PeerId, id: &str, message: &str) {
        let error = WireMessage::TransferError(TransferErrorMessage {
            id: id.to_string(),
            message: message.to_string(),
        });
        if let Err(e) = self.transport.send(Target::Peer(to.clone()), &error).await {
            warn!("Failed to report transfer error to {}: {}", to, e);
        }
    }

    /// Drop partial buffers from a departed peer
    pub fn discard_peer(&self, peer: &PeerId) {
        let mut incoming = self.incoming.lock();
        let before = incoming.len();
        incoming.retain(|(p, _), _| p != peer);
        let dropped = before - incoming.len();
        if dropped > 0 {
            info!("Discarded {} partial transfer(s) from {}", dropped, peer);
        }
    }

    pub fn in_progress(&self) -> usize {
        self.incoming.lock().len()
    }

    pub fn clear(&self) {
        self.incoming.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::chunk::split_chunks;
    use crate::transport::{MemoryMesh, MeshEvent};
    use tokio::sync::mpsc;

    async fn next_message(events: &mut mpsc::UnboundedReceiver<MeshEvent>) -> WireMessage {
        loop {
            match events.recv().await {
                Some(MeshEvent::Message { message, .. }) => return message,
                Some(_) => continue,
                None => panic!("mesh closed"),
            }
        }
    }

    fn announce(id: &str, data: &[u8], chunk_size: usize) -> (TransferMetadata, Vec<TransferChunk>) {
        let chunks: Vec<TransferChunk> = split_chunks(data, chunk_size)
            .into_iter()
            .enumerate()
            .map(|(i, c)| TransferChunk {
                id: id.to_string(),
                index: i as u32,
                data: c.to_vec(),
            })
            .collect();
        let metadata = TransferMetadata {
            id: id.to_string(),
            filename: "clip.webm".into(),
            size: data.len() as u64,
            mime_type: "video/webm".into(),
            hash: content_hash(data),
            total_chunks: chunks.len() as u32,
        };
        (metadata, chunks)
    }

    #[tokio::test]
    async fn test_complete_transfer_is_acked() {
        let mesh = MemoryMesh::new();
        let (_sender, mut sender_events) = mesh.join("s".into()).unwrap();
        let (r, _r_events) = mesh.join("r".into()).unwrap();
        let receiver = TransferReceiver::new(r, 1024 * 1024);

        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let (metadata, chunks) = announce("t1", &data, 8);
        receiver.handle_metadata(&"s".into(), metadata).await;

        let mut delivered = None;
        for chunk in chunks.into_iter().rev() {
            if let Some(payload) = receiver.handle_chunk(&"s".into(), chunk).await.unwrap() {
                delivered = Some(payload);
            }
        }
        let payload = delivered.unwrap();
        assert_eq!(payload.data.as_ref(), data.as_slice());
        assert_eq!(receiver.in_progress(), 0);

        match next_message(&mut sender_events).await {
            WireMessage::TransferAck(ack) => {
                assert!(ack.complete);
                assert_eq!(ack.id, "t1");
                assert_eq!(ack.hash, content_hash(&data));
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_reported_not_acked() {
        let mesh = MemoryMesh::new();
        let (_sender, mut sender_events) = mesh.join("s".into()).unwrap();
        let (r, _r_events) = mesh.join("r".into()).unwrap();
        let receiver = TransferReceiver::new(r, 1024 * 1024);

        let data = vec![7u8; 100];
        let (metadata, mut chunks) = announce("t2", &data, 30);
        chunks[2].data[5] ^= 0x01;
        receiver.handle_metadata(&"s".into(), metadata).await;

        let mut result = Ok(None);
        for chunk in chunks {
            result = receiver.handle_chunk(&"s".into(), chunk).await;
        }
        let err = result.unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));

        match next_message(&mut sender_events).await {
            WireMessage::TransferError(e) => assert_eq!(e.id, "t2"),
            other => panic!("expected transfer-error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_transfers_are_kept_apart() {
        let mesh = MemoryMesh::new();
        let (_sender, _sender_events) = mesh.join("s".into()).unwrap();
        let (r, _r_events) = mesh.join("r".into()).unwrap();
        let receiver = TransferReceiver::new(r, 1024 * 1024);

        let (meta_a, chunks_a) = announce("a", b"aaaaaaaaaa", 4);
        let (meta_b, chunks_b) = announce("b", b"bbbbbbbbbbbbbb", 4);
        receiver.handle_metadata(&"s".into(), meta_a).await;
        receiver.handle_metadata(&"s".into(), meta_b).await;
        assert_eq!(receiver.in_progress(), 2);

        let mut done = Vec::new();
        for chunk in chunks_a.into_iter().chain(chunks_b) {
            if let Some(p) = receiver.handle_chunk(&"s".into(), chunk).await.unwrap() {
                done.push((p.id, p.data));
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0], ("a".to_string(), Bytes::from_static(b"aaaaaaaaaa")));
        assert_eq!(done[1], ("b".to_string(), Bytes::from_static(b"bbbbbbbbbbbbbb")));
    }

    #[tokio::test]
    async fn test_oversized_announcement_is_rejected() {
        let mesh = MemoryMesh::new();
        let (_sender, mut sender_events) = mesh.join("s".into()).unwrap();
        let (r, _r_events) = mesh.join("r".into()).unwrap();
        let receiver = TransferReceiver::new(r, 1024 * 1024);

        let (mut metadata, _) = announce("big", b"tiny", 4);
        metadata.size = u64::MAX;
        metadata.total_chunks = u32::MAX;
        receiver.handle_metadata(&"s".into(), metadata).await;
        assert_eq!(receiver.in_progress(), 0);

        match next_message(&mut sender_events).await {
            WireMessage::TransferError(e) => assert_eq!(e.id, "big"),
            other => panic!("expected transfer-error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discard_peer_drops_partial_buffers() {
        let mesh = MemoryMesh::new();
        let (_sender, _sender_events) = mesh.join("s".into()).unwrap();
        let (r, _r_events) = mesh.join("r".into()).unwrap();
        let receiver = TransferReceiver::new(r, 1024 * 1024);

        let (metadata, chunks) = announce("t3", &[1u8; 40], 10);
        receiver.handle_metadata(&"s".into(), metadata).await;
        let first = chunks[0].clone();
        receiver.handle_chunk(&"s".into(), first).await.unwrap();

        receiver.discard_peer(&"s".into());
        assert_eq!(receiver.in_progress(), 0);
        // Later chunks are for an unknown transfer now
        assert!(receiver
            .handle_chunk(&"s".into(), chunks[1].clone())
            .await
            .unwrap()
            .is_none());
    }
}
