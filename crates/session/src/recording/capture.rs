//! Local capture collaborator
//!
//! Device acquisition and encoding live outside this crate. The coordinator
//! only needs to open a source and, later, collect the encoded bytes.

use super::clip::SourceType;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Opens capture streams for local sources
#[async_trait]
pub trait CaptureService: Send + Sync {
    /// Begin capturing `source`
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailed`] if the device cannot be opened.
    async fn start_capture(&self, source: SourceType) -> Result<Box<dyn CaptureStream>>;
}

/// One running capture
#[async_trait]
pub trait CaptureStream: Send + Sync {
    /// Stop capturing and return the encoded payload
    async fn finish(self: Box<Self>) -> Result<Bytes>;
}

/// Deterministic in-process capture for demos and tests
///
/// Every finished stream yields a small header naming the peer, source and
/// sequence number, followed by `payload_size` filler bytes.
pub struct SyntheticCapture {
    label: String,
    payload_size: usize,
    failing: Mutex<HashSet<SourceType>>,
    sequence: AtomicU64,
}

impl SyntheticCapture {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload_size: 1024,
            failing: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Make every future `start_capture(source)` fail
    pub fn fail_source(&self, source: SourceType) {
        self.failing.lock().insert(source);
    }

    pub fn restore_source(&self, source: SourceType) {
        self.failing.lock().remove(&source);
    }
}

#[async_trait]
impl CaptureService for SyntheticCapture {
    async fn start_capture(&self, source: SourceType) -> Result<Box<dyn CaptureStream>> {
        if self.failing.lock().contains(&source) {
            return Err(Error::CaptureFailed(format!(
                "{} device unavailable for {}",
                source, self.label
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        debug!("Synthetic capture {} started: {} #{}", self.label, source, sequence);
        Ok(Box::new(SyntheticStream {
            header: format!("{}/{}/{}\n", self.label, source, sequence),
            payload_size: self.payload_size,
        }))
    }
}

struct SyntheticStream {
    header: String,
    payload_size: usize,
}

#[async_trait]
impl CaptureStream for SyntheticStream {
    async fn finish(self: Box<Self>) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.header.len() + self.payload_size);
        buf.put_slice(self.header.as_bytes());
        for i in 0..self.payload_size {
            buf.put_u8((i % 251) as u8);
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_payload_is_deterministic() {
        let capture = SyntheticCapture::new("bob").with_payload_size(300);

        let first = capture.start_capture(SourceType::Camera).await.unwrap();
        let bytes = first.finish().await.unwrap();
        assert!(bytes.starts_with(b"bob/camera/0\n"));
        assert_eq!(bytes.len(), "bob/camera/0\n".len() + 300);

        let second = capture.start_capture(SourceType::Camera).await.unwrap();
        assert!(second.finish().await.unwrap().starts_with(b"bob/camera/1\n"));
    }

    #[tokio::test]
    async fn test_failing_source() {
        let capture = SyntheticCapture::new("bob");
        capture.fail_source(SourceType::Screen);

        let err = capture.start_capture(SourceType::Screen).await.err().unwrap();
        assert!(matches!(err, Error::CaptureFailed(_)));
        assert!(capture.start_capture(SourceType::Camera).await.is_ok());

        capture.restore_source(SourceType::Screen);
        assert!(capture.start_capture(SourceType::Screen).await.is_ok());
    }
}
