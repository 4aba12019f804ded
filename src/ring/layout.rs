//! Layout and index arithmetic shared by both wait policies
//!
//! ```text
//! offset 0   write index  (u32, writer-owned)
//! offset 4   read index   (u32, reader-owned)
//! offset 8   state word   (u32, advisory)
//! offset 12  data         (capacity + 1 bytes)
//! ```
//!
//! One data byte is kept free so `write == read` always means empty; the
//! ring never holds more than `capacity` bytes. Writers publish the write
//! index with `Release` after copying, readers publish the read index the
//! same way, and each side loads the other's index with `Acquire`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::region::SharedRegion;
use super::wait;

/// Bytes taken by the three control words at the start of a region
pub const CONTROL_BYTES: usize = 12;

/// Control words at the start of the region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlWord {
    WriteIndex,
    ReadIndex,
    State,
}

impl ControlWord {
    pub(crate) fn offset(self) -> usize {
        match self {
            ControlWord::WriteIndex => 0,
            ControlWord::ReadIndex => 4,
            ControlWord::State => 8,
        }
    }
}

/// Advisory ring state
///
/// Kept in the region so either side (or a debugger attached to a
/// file-backed ring) can see it. The indices alone decide emptiness and
/// fullness; the one state that changes behavior is `Overflow`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RingState {
    /// Nothing buffered
    Empty = 0,
    /// Some bytes buffered
    Ready = 1,
    /// A write saturated the buffer, or a writer is waiting for space
    Full = 2,
    /// A write larger than the capacity was attempted; further pushes fail
    Overflow = 3,
}

impl RingState {
    fn from_u32(raw: u32) -> Self {
        match raw {
            0 => RingState::Empty,
            1 => RingState::Ready,
            2 => RingState::Full,
            _ => RingState::Overflow,
        }
    }
}

/// Region size needed for a ring of `capacity` bytes
pub fn region_len(capacity: usize) -> usize {
    CONTROL_BYTES + capacity + 1
}

/// Deadline for a bounded wait
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    // None when the timeout is too large to represent
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` for an unbounded wait
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// What a blocked operation should wait on before retrying
#[derive(Clone, Copy, Debug)]
pub(crate) struct WaitOn {
    pub(crate) word: ControlWord,
    pub(crate) expected: u32,
}

/// Shared ring logic over a [`SharedRegion`]
#[derive(Clone, Debug)]
pub(crate) struct RingCore {
    region: Arc<SharedRegion>,
    capacity: usize,
    slots: usize,
}

impl RingCore {
    /// Allocate an anonymous region and initialize its control words
    pub(crate) fn create(capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let region = Arc::new(SharedRegion::anonymous(region_len(capacity))?);
        let core = Self::new_unchecked(region, capacity);
        core.reset();
        Ok(core)
    }

    /// Initialize a ring over an existing region, discarding its contents
    pub(crate) fn init(region: Arc<SharedRegion>, capacity: usize) -> Result<Self> {
        let core = Self::attach(region, capacity)?;
        core.reset();
        Ok(core)
    }

    /// Attach to a region that already holds a ring
    pub(crate) fn attach(region: Arc<SharedRegion>, capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let needed = region_len(capacity);
        if region.len() < needed {
            return Err(Error::config(
                format!(
                    "region of {} bytes is too small for a ring of capacity {capacity} (needs {needed})",
                    region.len()
                ),
                "capacity_bytes",
            ));
        }
        let core = Self::new_unchecked(region, capacity);
        let (w, r) = core.indices();
        if w as usize >= core.slots || r as usize >= core.slots {
            return Err(Error::config(
                format!("region indices ({w}, {r}) do not fit a ring of capacity {capacity}"),
                "capacity_bytes",
            ));
        }
        Ok(core)
    }

    fn check_capacity(capacity: usize) -> Result<()> {
        if capacity == 0 || capacity >= u32::MAX as usize {
            return Err(Error::config(
                format!("ring capacity must be between 1 and {} bytes", u32::MAX - 1),
                "capacity_bytes",
            ));
        }
        Ok(())
    }

    fn new_unchecked(region: Arc<SharedRegion>, capacity: usize) -> Self {
        Self {
            region,
            capacity,
            slots: capacity + 1,
        }
    }

    fn reset(&self) {
        self.word(ControlWord::WriteIndex).store(0, Ordering::Release);
        self.word(ControlWord::ReadIndex).store(0, Ordering::Release);
        self.word(ControlWord::State)
            .store(RingState::Empty as u32, Ordering::Release);
    }

    pub(crate) fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn word(&self, word: ControlWord) -> &AtomicU32 {
        self.region.word(word)
    }

    fn indices(&self) -> (u32, u32) {
        let w = self.word(ControlWord::WriteIndex).load(Ordering::Acquire);
        let r = self.word(ControlWord::ReadIndex).load(Ordering::Acquire);
        (w, r)
    }

    fn length_between(&self, w: u32, r: u32) -> usize {
        (w as usize + self.slots - r as usize) % self.slots
    }

    pub(crate) fn len(&self) -> usize {
        let (w, r) = self.indices();
        self.length_between(w, r)
    }

    pub(crate) fn available_space(&self) -> usize {
        self.capacity - self.len()
    }

    pub(crate) fn state(&self) -> RingState {
        RingState::from_u32(self.word(ControlWord::State).load(Ordering::Acquire))
    }

    pub(crate) fn is_overflowed(&self) -> bool {
        self.state() == RingState::Overflow
    }

    /// Store `next` unless the ring has overflowed; returns the previous state
    pub(crate) fn set_state(&self, next: RingState) -> RingState {
        let word = self.word(ControlWord::State);
        let mut current = word.load(Ordering::Acquire);
        loop {
            if current == RingState::Overflow as u32 || current == next as u32 {
                return RingState::from_u32(current);
            }
            match word.compare_exchange_weak(
                current,
                next as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => return RingState::from_u32(prev),
                Err(actual) => current = actual,
            }
        }
    }

    /// Put `prior` back if the state is still `Full`
    pub(crate) fn restore_state(&self, prior: RingState) {
        let _ = self.word(ControlWord::State).compare_exchange(
            RingState::Full as u32,
            prior as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_overflow(&self) {
        self.word(ControlWord::State)
            .store(RingState::Overflow as u32, Ordering::Release);
        // Writers parked on the read index re-check and see the overflow
        wait::wake_all(self.word(ControlWord::ReadIndex));
    }

    /// Cases a push settles without touching the data area
    ///
    /// Returns `Some(result)` for empty writes, an overflowed ring, or a write
    /// that can never fit (which marks the ring overflowed).
    pub(crate) fn precheck_push(&self, len: usize) -> Option<bool> {
        if len == 0 {
            return Some(true);
        }
        if self.is_overflowed() {
            tracing::debug!(len, "push rejected: ring has overflowed");
            return Some(false);
        }
        if len > self.capacity {
            tracing::error!(
                len,
                capacity = self.capacity,
                "write larger than ring capacity, marking ring overflowed"
            );
            self.mark_overflow();
            return Some(false);
        }
        None
    }

    /// Cases a shift or peek settles without waiting
    ///
    /// `Some(None)` is the "never satisfiable" sentinel for reads larger than
    /// the capacity.
    pub(crate) fn precheck_read(&self, n: usize) -> Option<Option<Vec<u8>>> {
        if n == 0 {
            return Some(Some(Vec::new()));
        }
        if n > self.capacity {
            tracing::error!(
                requested = n,
                capacity = self.capacity,
                "read larger than ring capacity can never be satisfied"
            );
            return Some(None);
        }
        None
    }

    /// Called each time a push finds no room
    ///
    /// Records the state seen before the first wait in `prior` and flags the
    /// ring `Full` while the writer waits.
    pub(crate) fn note_push_blocked(&self, prior: &mut Option<RingState>) {
        if prior.is_none() {
            *prior = Some(self.set_state(RingState::Full));
        }
    }

    /// Undo [`note_push_blocked`](Self::note_push_blocked) after a timeout
    pub(crate) fn push_timed_out(&self, prior: Option<RingState>, len: usize) {
        if let Some(prior) = prior {
            self.restore_state(prior);
        }
        tracing::debug!(len, capacity = self.capacity, "push timed out waiting for space");
    }

    /// Copy `data` in if it fits; otherwise report what to wait on
    ///
    /// Must only be called by the single writer.
    pub(crate) fn try_write(&self, data: &[u8]) -> std::result::Result<(), WaitOn> {
        let (w, r) = self.indices();
        let free = self.capacity - self.length_between(w, r);
        if data.len() > free {
            return Err(WaitOn {
                word: ControlWord::ReadIndex,
                expected: r,
            });
        }

        let start = w as usize;
        let first = data.len().min(self.slots - start);
        let base = self.region.data_ptr();
        // SAFETY: `start + first <= slots` and `data.len() - first < slots`
        // keep both copies inside the data area. The bytes between the write
        // and read index belong to the writer until the index is published.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, data.len() - first);
        }

        let next = ((start + data.len()) % self.slots) as u32;
        self.word(ControlWord::WriteIndex)
            .store(next, Ordering::Release);

        let r_now = self.word(ControlWord::ReadIndex).load(Ordering::Acquire);
        if self.length_between(next, r_now) == self.capacity {
            self.set_state(RingState::Full);
        } else {
            self.set_state(RingState::Ready);
        }
        wait::wake_all(self.word(ControlWord::WriteIndex));
        Ok(())
    }

    /// Copy out `n` bytes if available, advancing the read index when `consume`
    ///
    /// Must only be called by the single reader.
    pub(crate) fn try_read(&self, n: usize, consume: bool) -> std::result::Result<Vec<u8>, WaitOn> {
        let (w, r) = self.indices();
        if self.length_between(w, r) < n {
            return Err(WaitOn {
                word: ControlWord::WriteIndex,
                expected: w,
            });
        }

        let start = r as usize;
        let first = n.min(self.slots - start);
        let mut out = vec![0u8; n];
        let base = self.region.data_ptr();
        // SAFETY: same bounds as `try_write`; the bytes between the read and
        // write index were published by the writer's Release store, which
        // the Acquire load above synchronizes with.
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), n - first);
        }

        if consume {
            let next = ((start + n) % self.slots) as u32;
            self.word(ControlWord::ReadIndex)
                .store(next, Ordering::Release);
            let w_now = self.word(ControlWord::WriteIndex).load(Ordering::Acquire);
            if w_now == next {
                self.set_state(RingState::Empty);
            } else {
                self.set_state(RingState::Ready);
            }
            wait::wake_all(self.word(ControlWord::ReadIndex));
        }
        Ok(out)
    }

    /// Whether at least `n` bytes are buffered; otherwise what to wait on
    pub(crate) fn check_available(&self, n: usize) -> std::result::Result<(), WaitOn> {
        let (w, r) = self.indices();
        if self.length_between(w, r) >= n {
            Ok(())
        } else {
            Err(WaitOn {
                word: ControlWord::WriteIndex,
                expected: w,
            })
        }
    }
}
