//! Memory regions backing a ring
//!
//! A region is a `memmap2` mapping: anonymous for channels between threads of
//! one process, file-backed when two processes attach to the same ring.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::AtomicU32;

use crate::error::Result;

use super::layout::{CONTROL_BYTES, ControlWord};

/// Fixed-size memory region shared by both ends of a ring
///
/// Handles are shared through `Arc`; the mapping is released when the last
/// handle on either side drops.
pub struct SharedRegion {
    // Keeps the mapping alive; all access goes through `base`
    _map: MmapMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: the region is plain shared memory. Control words are only touched
// through `AtomicU32`, and the data area is partitioned between exactly one
// writer and one reader by the ring's index protocol, so concurrent access
// from two threads never overlaps on the same bytes.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion").field("len", &self.len).finish()
    }
}

impl SharedRegion {
    /// Map `len` zeroed bytes of anonymous memory
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the mapping fails.
    pub fn anonymous(len: usize) -> Result<Self> {
        let map = MmapMut::map_anon(len)?;
        Ok(Self::from_map(map, len))
    }

    /// Map `len` bytes of the file at `path`, creating or growing it as needed
    ///
    /// Existing contents are preserved, so a second process opening the same
    /// file sees the ring the first one created.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, sized, or mapped.
    pub fn open_file<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < len as u64 {
            file.set_len(len as u64)?;
        }

        // SAFETY: the file is opened read/write and sized to at least `len`.
        // Other mappings of the same file are expected; they coordinate via
        // the ring's atomic control words.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self::from_map(map, len))
    }

    fn from_map(mut map: MmapMut, len: usize) -> Self {
        let base = map.as_mut_ptr();
        Self {
            _map: map,
            base,
            len,
        }
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is zero-sized
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn word(&self, word: ControlWord) -> &AtomicU32 {
        debug_assert!(self.len >= CONTROL_BYTES);
        // SAFETY: mappings are page aligned and the three control words sit
        // at byte offsets 0, 4 and 8, inside the region, so each is a valid,
        // aligned u32 that lives as long as `self`.
        unsafe { &*(self.base.add(word.offset()) as *const AtomicU32) }
    }

    /// Pointer to the first data byte
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        // SAFETY: callers construct rings only over regions at least
        // CONTROL_BYTES + 1 long, so the offset stays in bounds.
        unsafe { self.base.add(CONTROL_BYTES) }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn anonymous_region_is_zeroed() {
        let region = SharedRegion::anonymous(64).unwrap();
        assert_eq!(region.len(), 64);
        for word in [
            ControlWord::WriteIndex,
            ControlWord::ReadIndex,
            ControlWord::State,
        ] {
            assert_eq!(region.word(word).load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn file_region_is_shared_between_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.shm");

        let a = SharedRegion::open_file(&path, 64).unwrap();
        let b = SharedRegion::open_file(&path, 64).unwrap();

        a.word(ControlWord::WriteIndex).store(42, Ordering::SeqCst);
        assert_eq!(b.word(ControlWord::WriteIndex).load(Ordering::SeqCst), 42);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
    }
}
