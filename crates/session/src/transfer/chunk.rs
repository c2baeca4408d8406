//! Payload hashing, chunking and reassembly

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of the whole payload as lowercase hex
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Number of chunks needed for `len` bytes; an empty payload still sends one
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    if len == 0 || chunk_size == 0 {
        return 1;
    }
    len.div_ceil(chunk_size) as u32
}

/// Fixed-size slices of `data`, the last one possibly shorter
pub fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if data.is_empty() || chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}

/// Receiver-side buffer for the announced chunk count
///
/// Memory grows with the chunks that actually arrive, not with the
/// announced totals.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    chunks: BTreeMap<u32, Vec<u8>>,
    total: u32,
    buffered: u64,
    expected_size: u64,
}

impl ReassemblyBuffer {
    pub fn new(total_chunks: u32, expected_size: u64) -> Self {
        Self {
            chunks: BTreeMap::new(),
            total: total_chunks,
            buffered: 0,
            expected_size,
        }
    }

    /// Store chunk `index`; returns false for out-of-range or duplicate
    /// indices and for data beyond the announced size
    pub fn insert(&mut self, index: u32, data: Vec<u8>) -> bool {
        if index >= self.total || self.chunks.contains_key(&index) {
            return false;
        }
        let buffered = self.buffered + data.len() as u64;
        if buffered > self.expected_size {
            return false;
        }
        self.buffered = buffered;
        self.chunks.insert(index, data);
        true
    }

    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.total
    }

    /// Concatenate all chunks in index order
    ///
    /// # Errors
    ///
    /// Returns error if a chunk is missing or the length differs from the
    /// announced size.
    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(Error::InvalidState(format!(
                "Reassembly incomplete: {}/{} chunks",
                self.received(),
                self.total
            )));
        }

        let mut out = Vec::with_capacity(self.buffered as usize);
        for chunk in self.chunks.into_values() {
            out.extend_from_slice(&chunk);
        }

        if out.len() as u64 != self.expected_size {
            return Err(Error::InvalidState(format!(
                "Reassembled {} bytes, expected {}",
                out.len(),
                self.expected_size
            )));
        }
        Ok(out)
    }
}
