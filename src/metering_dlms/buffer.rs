use std::sync::Arc;

use crate::events::{EventSink, MeterEvent};

pub const HDLC_BUFFER_MAX_SIZE: usize = 5000;

/// Holds raw transport bytes until the frame assembler consumes them.
///
/// The buffer never grows past `max_size`: a chunk that would push it over
/// the bound clears everything buffered so far before it is stored.
pub struct ByteAccumulator {
    data: Vec<u8>,
    max_size: usize,
    events: Arc<dyn EventSink>,
}

impl ByteAccumulator {
    pub fn new(max_size: usize, events: Arc<dyn EventSink>) -> Self {
        ByteAccumulator {
            data: Vec::with_capacity(max_size.min(HDLC_BUFFER_MAX_SIZE)),
            max_size,
            events,
        }
    }

    /// Appends a chunk. Returns `true` when buffered data had to be dropped,
    /// in which case any in-flight reassembly built on it is stale too.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        let mut overflowed = false;

        if self.data.len() + bytes.len() > self.max_size {
            self.events.emit(MeterEvent::BufferOverflow {
                buffered: self.data.len() + bytes.len(),
                max_size: self.max_size,
            });
            self.data.clear();
            overflowed = true;
        }

        /* A single oversized chunk keeps only its newest bytes */
        let start = bytes.len().saturating_sub(self.max_size);
        self.data.extend_from_slice(&bytes[start..]);
        overflowed
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Removes the first `count` bytes
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(..count);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
