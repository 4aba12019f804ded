//! Block-on-address primitive
//!
//! `wait` blocks the calling thread until the word no longer holds `expected`,
//! someone calls `wake_all` on it, or the timeout elapses. On Linux this is
//! the futex syscall (the shared variant, so file-backed regions mapped by two
//! processes wake each other). Elsewhere it degrades to a short sleep and
//! re-check, which callers cannot tell apart from a spurious wake-up.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Why a wait returned
///
/// Callers re-check their condition in every case; the outcome is only
/// diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// Woken by a notification, a signal, or spuriously
    Woken,
    /// The word already differed from `expected`
    Changed,
    /// The timeout elapsed
    TimedOut,
}

/// Block while `word == expected`, for at most `timeout` (`None` = no limit)
#[cfg(target_os = "linux")]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: `word` is a valid, aligned u32 for the duration of the call and
    // `ts_ptr` is either null or points at a live timespec.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
        )
    };
    if rc == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => WaitOutcome::Changed,
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        _ => WaitOutcome::Woken,
    }
}

/// Wake every thread blocked in [`wait`] on `word`
#[cfg(target_os = "linux")]
pub(crate) fn wake_all(word: &AtomicU32) {
    // SAFETY: `word` is a valid, aligned u32; FUTEX_WAKE does not dereference
    // anything else.
    unsafe {
        libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
    }
}

#[cfg(not(target_os = "linux"))]
const FALLBACK_SLICE: Duration = Duration::from_millis(1);

#[cfg(not(target_os = "linux"))]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use std::sync::atomic::Ordering;

    if word.load(Ordering::Acquire) != expected {
        return WaitOutcome::Changed;
    }
    let slice = timeout.map_or(FALLBACK_SLICE, |t| t.min(FALLBACK_SLICE));
    if slice.is_zero() {
        return WaitOutcome::TimedOut;
    }
    std::thread::sleep(slice);
    if word.load(Ordering::Acquire) != expected {
        WaitOutcome::Changed
    } else {
        WaitOutcome::Woken
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_all(_word: &AtomicU32) {}
