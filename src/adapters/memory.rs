//! In-memory adapters.
//!
//! - [`MemoryStreamSource`]: artifacts held in RAM (tests, small images
//!   received over the network and staged before a campaign).
//! - [`RingRecordStore`]: bounded log-record FIFO that evicts the oldest
//!   record when full.

use std::collections::BTreeMap;
use std::sync::Arc;

use heapless::Deque;

use crate::app::ports::{LogRecord, RecordStore, SourceStream, StreamSource};
use crate::error::{StoreError, StreamError};

/// 32-bit additive checksum announced in transfer start frames.
pub fn artifact_checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

// ───────────────────────────────────────────────────────────────
// Stream source
// ───────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct MemoryStreamSource {
    artifacts: BTreeMap<String, Arc<[u8]>>,
}

impl MemoryStreamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) an artifact under `name`.
    pub fn insert(&mut self, name: &str, data: impl Into<Arc<[u8]>>) {
        self.artifacts.insert(name.into(), data.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.artifacts.remove(name).is_some()
    }
}

pub struct MemoryStream {
    data: Arc<[u8]>,
    checksum: u32,
    pos: usize,
}

impl SourceStream for MemoryStream {
    fn len(&self) -> u32 {
        self.data.len() as u32
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u32) -> Result<(), StreamError> {
        let offset = offset as usize;
        if offset > self.data.len() {
            return Err(StreamError::SeekFailed);
        }
        self.pos = offset;
        Ok(())
    }
}

impl StreamSource for MemoryStreamSource {
    type Stream = MemoryStream;

    fn open(&mut self, name: &str) -> Result<MemoryStream, StreamError> {
        let data = self.artifacts.get(name).ok_or(StreamError::NotFound)?.clone();
        if u32::try_from(data.len()).is_err() {
            return Err(StreamError::InvalidLength);
        }
        Ok(MemoryStream {
            checksum: artifact_checksum(&data),
            data,
            pos: 0,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Record store
// ───────────────────────────────────────────────────────────────

/// Fixed-capacity record FIFO.
pub struct RingRecordStore<const N: usize> {
    records: Deque<LogRecord, N>,
    evicted: u32,
}

impl<const N: usize> RingRecordStore<N> {
    pub const fn new() -> Self {
        Self {
            records: Deque::new(),
            evicted: 0,
        }
    }

    /// Records dropped to make room since construction.
    pub fn evicted(&self) -> u32 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }
}

impl<const N: usize> Default for RingRecordStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RecordStore for RingRecordStore<N> {
    fn append(&mut self, record: &LogRecord) -> Result<(), StoreError> {
        if N == 0 {
            return Err(StoreError::Rejected);
        }
        if self.records.is_full() {
            self.records.pop_front();
            self.evicted = self.evicted.wrapping_add(1);
        }
        self.records
            .push_back(*record)
            .map_err(|_| StoreError::Rejected)
    }

    fn read_oldest(&self) -> Result<LogRecord, StoreError> {
        self.records.front().copied().ok_or(StoreError::Empty)
    }

    fn delete_oldest(&mut self) -> Result<(), StoreError> {
        self.records.pop_front().map(|_| ()).ok_or(StoreError::Empty)
    }

    fn count(&self) -> usize {
        self.records.len()
    }
}
