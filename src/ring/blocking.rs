//! Ring buffer whose waits block the calling thread

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

use super::layout::{Deadline, RingCore, RingState, region_len};
use super::region::SharedRegion;
use super::wait;

/// Byte ring for one writer and one reader; waits park the OS thread
///
/// Use this on the side of a channel that runs on a dedicated thread. The
/// other side may attach to the same region with
/// [`AsyncRingBuffer`](super::AsyncRingBuffer).
#[derive(Clone, Debug)]
pub struct BlockingRingBuffer {
    core: RingCore,
}

impl BlockingRingBuffer {
    /// Allocate a fresh anonymous ring of `capacity` bytes
    ///
    /// # Errors
    ///
    /// Fails for a zero or oversized capacity, or if the mapping fails.
    pub fn create(capacity: usize) -> Result<Self> {
        Ok(Self {
            core: RingCore::create(capacity)?,
        })
    }

    /// Attach to a region that already holds a ring of `capacity` bytes
    ///
    /// # Errors
    ///
    /// Fails when the region is too small for `capacity` or its indices are
    /// out of range.
    pub fn from_existing(region: Arc<SharedRegion>, capacity: usize) -> Result<Self> {
        Ok(Self {
            core: RingCore::attach(region, capacity)?,
        })
    }

    /// Create (or reinitialize) a ring in the file at `path`
    ///
    /// # Errors
    ///
    /// Fails on an invalid capacity or any I/O error.
    pub fn create_in_file<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let region = Arc::new(SharedRegion::open_file(path, region_len(capacity))?);
        Ok(Self {
            core: RingCore::init(region, capacity)?,
        })
    }

    /// Attach to a ring another process created in the file at `path`
    ///
    /// # Errors
    ///
    /// Fails on an invalid capacity or any I/O error.
    pub fn open_file<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let region = Arc::new(SharedRegion::open_file(path, region_len(capacity))?);
        Self::from_existing(region, capacity)
    }

    /// Write all of `data`, blocking up to `timeout` for space
    ///
    /// Returns `false` on timeout or overflow; nothing is written in either
    /// case. An empty write succeeds immediately.
    pub fn push(&self, data: &[u8], timeout: Duration) -> bool {
        if let Some(done) = self.core.precheck_push(data.len()) {
            return done;
        }

        let deadline = Deadline::after(timeout);
        let mut prior = None;
        loop {
            match self.core.try_write(data) {
                Ok(()) => return true,
                Err(wait_on) => {
                    if self.core.is_overflowed() {
                        return false;
                    }
                    if deadline.is_expired() {
                        self.core.push_timed_out(prior, data.len());
                        return false;
                    }
                    self.core.note_push_blocked(&mut prior);
                    wait::wait(
                        self.core.word(wait_on.word),
                        wait_on.expected,
                        deadline.remaining(),
                    );
                }
            }
        }
    }

    /// Remove and return exactly `n` bytes, blocking up to `timeout`
    ///
    /// `None` on timeout, or immediately when `n` exceeds the capacity.
    pub fn shift(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.read(n, timeout, true)
    }

    /// Like [`shift`](Self::shift) but leaves the bytes in the ring
    pub fn peek(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.read(n, timeout, false)
    }

    fn read(&self, n: usize, timeout: Duration, consume: bool) -> Option<Vec<u8>> {
        if let Some(done) = self.core.precheck_read(n) {
            return done;
        }

        let deadline = Deadline::after(timeout);
        loop {
            match self.core.try_read(n, consume) {
                Ok(bytes) => return Some(bytes),
                Err(wait_on) => {
                    if deadline.is_expired() {
                        return None;
                    }
                    wait::wait(
                        self.core.word(wait_on.word),
                        wait_on.expected,
                        deadline.remaining(),
                    );
                }
            }
        }
    }

    /// Block until at least `n` bytes are buffered; `false` on timeout
    pub fn wait_for_data(&self, n: usize, timeout: Duration) -> bool {
        if n > self.core.capacity() {
            return false;
        }
        let deadline = Deadline::after(timeout);
        loop {
            match self.core.check_available(n) {
                Ok(()) => return true,
                Err(wait_on) => {
                    if deadline.is_expired() {
                        return false;
                    }
                    wait::wait(
                        self.core.word(wait_on.word),
                        wait_on.expected,
                        deadline.remaining(),
                    );
                }
            }
        }
    }

    /// Buffered byte count
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.core.len() == 0
    }

    /// Whether the ring holds `capacity` bytes
    pub fn is_full(&self) -> bool {
        self.core.available_space() == 0
    }

    /// Bytes that can be pushed without waiting
    pub fn available_space(&self) -> usize {
        self.core.available_space()
    }

    /// Maximum buffered bytes
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    /// Current advisory state
    pub fn state(&self) -> RingState {
        self.core.state()
    }

    /// Whether an oversized write has poisoned the ring
    pub fn is_overflowed(&self) -> bool {
        self.core.is_overflowed()
    }

    /// The backing region, for handing to the other side
    pub fn region(&self) -> Arc<SharedRegion> {
        Arc::clone(self.core.region())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn zero_length_operations_are_immediate() {
        let ring = BlockingRingBuffer::create(8).unwrap();
        assert!(ring.push(&[], Duration::ZERO));
        assert_eq!(ring.shift(0, Duration::ZERO), Some(Vec::new()));
        assert_eq!(ring.peek(0, Duration::ZERO), Some(Vec::new()));
        assert!(ring.wait_for_data(0, Duration::ZERO));
    }

    #[test]
    fn oversized_push_overflows_without_partial_write() {
        let ring = BlockingRingBuffer::create(8).unwrap();
        assert!(ring.push(b"abc", SHORT));

        assert!(!ring.push(&[0u8; 9], LONG));
        assert_eq!(ring.state(), RingState::Overflow);
        assert_eq!(ring.len(), 3);

        // Reads still drain what was written before the overflow
        assert_eq!(ring.shift(3, SHORT).unwrap(), b"abc");
        assert!(!ring.push(b"x", SHORT), "overflow is permanent");
    }

    #[test]
    fn oversized_read_returns_sentinel_immediately() {
        let ring = BlockingRingBuffer::create(8).unwrap();
        let start = Instant::now();
        assert_eq!(ring.shift(9, LONG), None);
        assert!(!ring.wait_for_data(9, LONG));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn push_times_out_and_ring_stays_usable() {
        let ring = BlockingRingBuffer::create(4).unwrap();
        assert!(ring.push(b"abcd", SHORT));
        assert!(ring.is_full());

        let start = Instant::now();
        assert!(!ring.push(b"e", SHORT));
        assert!(start.elapsed() >= SHORT);
        assert_ne!(ring.state(), RingState::Overflow);

        assert_eq!(ring.shift(2, SHORT).unwrap(), b"ab");
        assert!(ring.push(b"ef", SHORT));
        assert_eq!(ring.shift(4, SHORT).unwrap(), b"cdef");
        assert!(ring.is_empty());
    }

    #[test]
    fn shift_times_out_on_empty_ring() {
        let ring = BlockingRingBuffer::create(4).unwrap();
        assert_eq!(ring.shift(1, SHORT), None);
        assert!(ring.push(b"z", SHORT));
        assert_eq!(ring.shift(1, SHORT).unwrap(), b"z");
    }

    #[test]
    fn reader_blocks_until_writer_catches_up() {
        let ring = BlockingRingBuffer::create(64).unwrap();
        let reader = {
            let ring = ring.clone();
            std::thread::spawn(move || ring.shift(10, LONG))
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(ring.push(b"01234", SHORT));
        std::thread::sleep(Duration::from_millis(20));
        assert!(ring.push(b"56789", SHORT));

        assert_eq!(reader.join().unwrap().unwrap(), b"0123456789");
    }

    #[test]
    fn writer_blocks_until_reader_frees_space() {
        let ring = BlockingRingBuffer::create(4).unwrap();
        assert!(ring.push(b"abcd", SHORT));

        let writer = {
            let ring = ring.clone();
            std::thread::spawn(move || ring.push(b"efgh", LONG))
        };

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ring.state(), RingState::Full);
        assert_eq!(ring.shift(4, SHORT).unwrap(), b"abcd");

        assert!(writer.join().unwrap());
        assert_eq!(ring.shift(4, SHORT).unwrap(), b"efgh");
    }

    #[test]
    fn spsc_stream_arrives_intact_across_threads() {
        let ring = BlockingRingBuffer::create(37).unwrap();
        let expected: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let writer = {
            let ring = ring.clone();
            let data = expected.clone();
            std::thread::spawn(move || {
                for chunk in data.chunks(13) {
                    assert!(ring.push(chunk, LONG));
                }
            })
        };

        let mut got = Vec::with_capacity(expected.len());
        while got.len() < expected.len() {
            let n = (expected.len() - got.len()).min(7);
            got.extend(ring.shift(n, LONG).unwrap());
        }
        writer.join().unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn file_backed_ring_is_visible_to_a_second_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.ring");

        let writer = BlockingRingBuffer::create_in_file(&path, 32).unwrap();
        let reader = BlockingRingBuffer::open_file(&path, 32).unwrap();

        assert!(writer.push(b"across mappings", SHORT));
        assert_eq!(reader.len(), 15);
        assert_eq!(reader.shift(15, SHORT).unwrap(), b"across mappings");
        assert!(writer.is_empty());
    }
}
