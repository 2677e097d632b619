use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::error::TransferError;
use crate::protocol::FileChunk;

/// State of the one transfer allowed per link.
///
/// Chunks may arrive in any order; a repeated sequence number overwrites the
/// earlier chunk.
#[derive(Debug)]
pub struct TransferSession {
    path: String,
    file_name: String,
    chunks: BTreeMap<u16, Bytes>,
}

impl TransferSession {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            path,
            file_name,
            chunks: BTreeMap::new(),
        }
    }

    /// Path requested from the device.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final segment of the requested path; empty if the path had none.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Store a chunk. Returns `true` when it replaced an earlier one.
    pub fn insert(&mut self, chunk: FileChunk) -> bool {
        self.chunks.insert(chunk.sequence, chunk.data).is_some()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_count(&self) -> usize {
        self.chunks.values().map(Bytes::len).sum()
    }

    /// Concatenate sequences `0..=max` in order.
    pub fn reassemble(&self) -> Result<Bytes, TransferError> {
        let Some((&max, _)) = self.chunks.last_key_value() else {
            return Err(TransferError::Empty);
        };
        // Keys are sorted; a gap shows up as a key that differs from its rank.
        if self.chunks.len() != usize::from(max) + 1 {
            let sequence = self
                .chunks
                .keys()
                .zip(0u16..)
                .find(|(seq, expected)| **seq != *expected)
                .map(|(_, expected)| expected)
                .unwrap_or(max);
            return Err(TransferError::MissingChunk { sequence });
        }

        let mut out = BytesMut::with_capacity(self.byte_count());
        for data in self.chunks.values() {
            out.extend_from_slice(data);
        }
        Ok(out.freeze())
    }
}
