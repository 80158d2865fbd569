//! Fixed-capacity mono PCM ring buffer with one writer and many independent readers.
//!
//! Each reader tracks its own monotonic `read_index`. The writer never blocks on
//! readers; a reader that falls more than `capacity` samples behind the write
//! cursor is snapped forward to the oldest sample still available and loses the
//! audio in between. This is the multi-consumer fan-out the wake-word detector
//! and the speech capture consumer both read from — neither can stall the other.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{Result, RoverError};

/// Handle identifying one registered reader. Opaque outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(u64);

/// Outcome of a [`RingBuffer::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Exactly the requested number of samples, in order.
    Ready(Vec<i16>),
    /// Fewer than the requested number of samples are available; index unchanged.
    NotReady,
}

struct Inner {
    storage: Vec<i16>,
    write_index: u64,
    next_reader_id: u64,
    readers: HashMap<u64, u64>,
}

pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RingBuffer {
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            capacity: capacity_samples,
            inner: Mutex::new(Inner {
                storage: vec![0i16; capacity_samples],
                write_index: 0,
                next_reader_id: 0,
                readers: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new reader. It starts at the current write cursor — no
    /// historical replay of audio captured before registration.
    pub fn register_reader(&self) -> ReaderId {
        let mut inner = self.inner.lock();
        let id = inner.next_reader_id;
        inner.next_reader_id += 1;
        let write_index = inner.write_index;
        inner.readers.insert(id, write_index);
        ReaderId(id)
    }

    pub fn unregister_reader(&self, reader: ReaderId) {
        self.inner.lock().readers.remove(&reader.0);
    }

    /// Copy `samples` into the circular storage and advance the write cursor.
    pub fn write(&self, samples: &[i16]) -> Result<()> {
        if samples.len() > self.capacity {
            return Err(RoverError::ChunkExceedsCapacity(samples.len(), self.capacity));
        }
        let mut inner = self.inner.lock();
        let cap = self.capacity;
        let start = (inner.write_index % cap as u64) as usize;
        let n = samples.len();
        let end = start + n;
        if end <= cap {
            inner.storage[start..end].copy_from_slice(samples);
        } else {
            let first_len = cap - start;
            inner.storage[start..cap].copy_from_slice(&samples[..first_len]);
            inner.storage[..n - first_len].copy_from_slice(&samples[first_len..]);
        }
        inner.write_index += n as u64;
        Ok(())
    }

    /// Read exactly `k` samples for `reader`, advancing its read cursor.
    ///
    /// If the reader has fallen more than `capacity` samples behind, its read
    /// cursor is snapped forward to `write_index - capacity` first (the
    /// intervening audio is lost), then the read proceeds from there.
    pub fn read(&self, reader: ReaderId, k: usize) -> Result<ReadOutcome> {
        if k > self.capacity {
            return Err(RoverError::ChunkExceedsCapacity(k, self.capacity));
        }
        let mut inner = self.inner.lock();
        let cap = self.capacity as u64;
        let mut read_index = *inner
            .readers
            .get(&reader.0)
            .ok_or(RoverError::UnknownReader)?;

        let mut available = inner.write_index.saturating_sub(read_index);
        if available > cap {
            let skipped = available - cap;
            read_index = inner.write_index - cap;
            available = cap;
            tracing::warn!(reader = reader.0, skipped, "reader fell behind capacity; snapped to latest");
        }

        if available < k as u64 {
            if let Some(slot) = inner.readers.get_mut(&reader.0) {
                *slot = read_index;
            }
            return Ok(ReadOutcome::NotReady);
        }

        let cap_usize = self.capacity;
        let start = (read_index % cap) as usize;
        let end = ((read_index + k as u64) % cap) as usize;
        let samples = if start < end || k == 0 {
            inner.storage[start..start + k].to_vec()
        } else {
            let mut buf = Vec::with_capacity(k);
            buf.extend_from_slice(&inner.storage[start..cap_usize]);
            buf.extend_from_slice(&inner.storage[..end]);
            buf
        };

        read_index += k as u64;
        inner.readers.insert(reader.0, read_index);
        Ok(ReadOutcome::Ready(samples))
    }

    /// Non-tracking peek of the most recent `k` samples. Diagnostics only —
    /// never advances a reader's cursor, does not require registration.
    pub fn latest(&self, k: usize) -> Vec<i16> {
        let inner = self.inner.lock();
        let k = k.min(self.capacity).min(inner.write_index as usize);
        if k == 0 {
            return Vec::new();
        }
        let read_index = inner.write_index - k as u64;
        let cap = self.capacity as u64;
        let start = (read_index % cap) as usize;
        let end = (inner.write_index % cap) as usize;
        if start < end {
            inner.storage[start..end].to_vec()
        } else {
            let mut buf = Vec::with_capacity(k);
            buf.extend_from_slice(&inner.storage[start..self.capacity]);
            buf.extend_from_slice(&inner.storage[..end]);
            buf
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_reader_sees_no_history() {
        let rb = RingBuffer::new(1024);
        rb.write(&[1, 2, 3]).unwrap();
        let r = rb.register_reader();
        assert_eq!(rb.read(r, 1).unwrap(), ReadOutcome::NotReady);
    }

    #[test]
    fn read_returns_exact_count_and_advances_index() {
        let rb = RingBuffer::new(16);
        let r = rb.register_reader();
        rb.write(&[1, 2, 3, 4, 5]).unwrap();
        match rb.read(r, 3).unwrap() {
            ReadOutcome::Ready(samples) => assert_eq!(samples, vec![1, 2, 3]),
            ReadOutcome::NotReady => panic!("expected ready"),
        }
        match rb.read(r, 2).unwrap() {
            ReadOutcome::Ready(samples) => assert_eq!(samples, vec![4, 5]),
            ReadOutcome::NotReady => panic!("expected ready"),
        }
        assert_eq!(rb.read(r, 1).unwrap(), ReadOutcome::NotReady);
    }

    #[test]
    fn wrap_around_write_and_read() {
        let rb = RingBuffer::new(4);
        let r = rb.register_reader();
        rb.write(&[1, 2, 3]).unwrap();
        assert_eq!(rb.read(r, 3).unwrap(), ReadOutcome::Ready(vec![1, 2, 3]));
        rb.write(&[4, 5, 6]).unwrap();
        assert_eq!(rb.read(r, 3).unwrap(), ReadOutcome::Ready(vec![4, 5, 6]));
    }

    #[test]
    fn two_independent_readers_track_separately() {
        let rb = RingBuffer::new(16);
        let slow = rb.register_reader();
        rb.write(&[1, 2, 3, 4]).unwrap();
        let fast = rb.register_reader();
        rb.write(&[5, 6]).unwrap();
        assert_eq!(
            rb.read(slow, 6).unwrap(),
            ReadOutcome::Ready(vec![1, 2, 3, 4, 5, 6])
        );
        assert_eq!(rb.read(fast, 2).unwrap(), ReadOutcome::Ready(vec![5, 6]));
    }

    #[test]
    fn reader_far_behind_snaps_to_latest_capacity_window() {
        let rb = RingBuffer::new(16000);
        let r = rb.register_reader();
        // Simulate the writer having advanced to 100_000 while the reader sat at 10_000.
        for _ in 0..100_000 / 4000 {
            rb.write(&[0i16; 4000]).unwrap();
        }
        // Force the bookkeeping the test wants to assert on directly.
        {
            let mut inner = rb.inner.lock();
            inner.readers.insert(r.0, 10_000);
        }
        match rb.read(r, 512).unwrap() {
            ReadOutcome::Ready(samples) => assert_eq!(samples.len(), 512),
            ReadOutcome::NotReady => panic!("expected ready after snap"),
        }
        let read_index = *rb.inner.lock().readers.get(&r.0).unwrap();
        assert_eq!(read_index, 100_000 - 16_000 + 512);
    }

    #[test]
    fn write_index_is_monotonic() {
        let rb = RingBuffer::new(64);
        rb.write(&[0; 10]).unwrap();
        let first = rb.inner.lock().write_index;
        rb.write(&[0; 5]).unwrap();
        let second = rb.inner.lock().write_index;
        assert!(second > first);
    }

    #[test]
    fn chunk_larger_than_capacity_is_rejected() {
        let rb = RingBuffer::new(8);
        assert!(matches!(
            rb.write(&[0; 9]),
            Err(RoverError::ChunkExceedsCapacity(9, 8))
        ));
    }
}
