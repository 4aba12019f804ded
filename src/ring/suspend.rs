//! Ring buffer whose waits suspend the calling task

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

use super::layout::{Deadline, RingCore, RingState, WaitOn, region_len};
use super::region::SharedRegion;
use super::wait;

/// Longest single park on the blocking pool
///
/// A cancelled operation leaves its parked thread behind until the next
/// wake-up or this slice elapses, whichever comes first.
const PARK_SLICE: Duration = Duration::from_millis(250);

/// Byte ring for one writer and one reader; waits yield to the runtime
///
/// Same layout and semantics as [`BlockingRingBuffer`](super::BlockingRingBuffer),
/// so one side of a channel may use each. The futex wait itself runs on
/// tokio's blocking pool, keeping runtime workers free while the task is
/// suspended.
#[derive(Clone, Debug)]
pub struct AsyncRingBuffer {
    core: RingCore,
}

impl AsyncRingBuffer {
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

    async fn park(&self, wait_on: WaitOn, deadline: &Deadline) {
        let slice = deadline
            .remaining()
            .map_or(PARK_SLICE, |left| left.min(PARK_SLICE));
        let region = Arc::clone(self.core.region());
        let parked = tokio::task::spawn_blocking(move || {
            wait::wait(region.word(wait_on.word), wait_on.expected, Some(slice))
        })
        .await;
        if let Err(e) = parked {
            // Only reachable when the runtime is shutting down; the caller
            // re-checks and eventually times out.
            tracing::debug!(error = %e, "ring park task did not complete");
        }
    }

    /// Write all of `data`, suspending up to `timeout` for space
    ///
    /// Returns `false` on timeout or overflow; nothing is written in either
    /// case. An empty write succeeds immediately.
    pub async fn push(&self, data: &[u8], timeout: Duration) -> bool {
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
                    self.park(wait_on, &deadline).await;
                }
            }
        }
    }

    /// Remove and return exactly `n` bytes, suspending up to `timeout`
    ///
    /// `None` on timeout, or immediately when `n` exceeds the capacity.
    pub async fn shift(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.read(n, timeout, true).await
    }

    /// Like [`shift`](Self::shift) but leaves the bytes in the ring
    pub async fn peek(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.read(n, timeout, false).await
    }

    async fn read(&self, n: usize, timeout: Duration, consume: bool) -> Option<Vec<u8>> {
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
                    self.park(wait_on, &deadline).await;
                }
            }
        }
    }

    /// Suspend until at least `n` bytes are buffered; `false` on timeout
    pub async fn wait_for_data(&self, n: usize, timeout: Duration) -> bool {
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
                    self.park(wait_on, &deadline).await;
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
    use crate::ring::BlockingRingBuffer;
    use proptest::prelude::*;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn read_before_write_suspends_then_resolves() {
        let ring = AsyncRingBuffer::create(32).unwrap();
        let reader = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.shift(4, LONG).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!reader.is_finished(), "reader must wait for data");

        assert!(ring.push(b"ping", SHORT).await);
        let got = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader should resume promptly")
            .unwrap();
        assert_eq!(got.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn wait_for_data_and_peek() {
        let ring = AsyncRingBuffer::create(16).unwrap();
        assert!(!ring.wait_for_data(2, SHORT).await);

        assert!(ring.push(b"hi!", SHORT).await);
        assert!(ring.wait_for_data(2, SHORT).await);
        assert_eq!(ring.peek(2, SHORT).await.unwrap(), b"hi");
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.shift(3, SHORT).await.unwrap(), b"hi!");
    }

    #[tokio::test]
    async fn timed_out_push_leaves_ring_usable() {
        let ring = AsyncRingBuffer::create(4).unwrap();
        assert!(ring.push(b"full", SHORT).await);

        let start = Instant::now();
        assert!(!ring.push(b"more", SHORT).await);
        assert!(start.elapsed() >= SHORT);
        assert!(!ring.is_overflowed());

        assert_eq!(ring.shift(4, SHORT).await.unwrap(), b"full");
        assert!(ring.push(b"more", SHORT).await);
    }

    #[tokio::test]
    async fn overflow_reported_immediately() {
        let ring = AsyncRingBuffer::create(4).unwrap();
        let start = Instant::now();
        assert!(!ring.push(b"too long", LONG).await);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(ring.state(), RingState::Overflow);
        assert_eq!(ring.shift(5, LONG).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_writer_feeds_blocking_reader() {
        let ring = AsyncRingBuffer::create(16).unwrap();
        let reader = BlockingRingBuffer::from_existing(ring.region(), ring.capacity()).unwrap();

        let consumer = std::thread::spawn(move || {
            let mut got = Vec::new();
            while got.len() < 1000 {
                let n = (1000 - got.len()).min(9);
                got.extend(reader.shift(n, LONG).unwrap());
            }
            got
        });

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        for chunk in data.chunks(11) {
            assert!(ring.push(chunk, LONG).await);
        }

        assert_eq!(consumer.join().unwrap(), data);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn interleaved_writes_and_reads_preserve_bytes(
            capacity in 1usize..64,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..40),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ring = AsyncRingBuffer::create(capacity).unwrap();
                let mut expected = std::collections::VecDeque::new();
                let mut received = Vec::new();
                let mut sent = Vec::new();

                for chunk in &chunks {
                    let chunk = &chunk[..chunk.len().min(capacity)];
                    if chunk.len() > ring.available_space() {
                        let drain = ring.len();
                        received.extend(ring.shift(drain, Duration::ZERO).await.unwrap());
                        expected.clear();
                    }
                    prop_assert!(ring.push(chunk, Duration::ZERO).await);
                    sent.extend_from_slice(chunk);
                    expected.extend(chunk.iter().copied());
                    prop_assert_eq!(ring.len(), expected.len());
                }
                let drain = ring.len();
                received.extend(ring.shift(drain, Duration::ZERO).await.unwrap());

                prop_assert_eq!(received, sent);
                prop_assert!(ring.is_empty());
                Ok(())
            })?;
        }
    }
}
