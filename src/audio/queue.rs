//! Bounded playback queue
//!
//! Ordered chunks of ready-to-render PCM, bounded by total byte capacity.
//! Overflow evicts from the front (oldest) until the new chunk fits, so the
//! queue always holds the most recent audio. Owned exclusively by the
//! playback worker; no internal locking.

use bytes::Bytes;

/// Byte-bounded FIFO of PCM chunks
pub struct PlaybackQueue {
    chunks: std::collections::VecDeque<Bytes>,
    total_bytes: usize,
    capacity_bytes: usize,
}

impl PlaybackQueue {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            chunks: std::collections::VecDeque::new(),
            total_bytes: 0,
            capacity_bytes,
        }
    }

    /// Append a chunk, evicting oldest chunks until it fits.
    ///
    /// Returns the number of chunks evicted. A chunk larger than the whole
    /// capacity is dropped outright (returning 0 evictions) rather than
    /// emptying the queue for nothing.
    pub fn push_back(&mut self, chunk: Bytes) -> usize {
        if chunk.len() > self.capacity_bytes {
            tracing::warn!(
                "Playback chunk of {}B exceeds queue capacity {}B, dropping",
                chunk.len(),
                self.capacity_bytes
            );
            return 0;
        }

        let mut evicted = 0;
        while self.total_bytes + chunk.len() > self.capacity_bytes {
            match self.chunks.pop_front() {
                Some(old) => {
                    self.total_bytes -= old.len();
                    evicted += 1;
                }
                None => break,
            }
        }

        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        debug_assert!(self.total_bytes <= self.capacity_bytes);
        evicted
    }

    /// Re-insert an unwritten remainder at the front, preserving order.
    ///
    /// Used by the drain loop after a partial device write; the remainder
    /// was already accounted inside capacity when first enqueued.
    pub fn push_front(&mut self, chunk: Bytes) {
        self.total_bytes += chunk.len();
        self.chunks.push_front(chunk);
    }

    /// Take the oldest chunk
    pub fn pop_front(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.pop_front()?;
        self.total_bytes -= chunk.len();
        Some(chunk)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}
