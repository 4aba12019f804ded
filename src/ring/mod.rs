//! Single-producer/single-consumer byte ring over shared memory
//!
//! The ring lives in a [`SharedRegion`]: three atomic `u32` control words
//! (write index, read index, state) followed by `capacity + 1` data bytes.
//! Two wait policies share the same layout:
//!
//! - [`BlockingRingBuffer`] parks the OS thread; use it on a dedicated
//!   worker thread.
//! - [`AsyncRingBuffer`] suspends the calling task; use it from async code.
//!
//! A region created by one policy can be attached by the other with
//! `from_existing`, which is how a download task hands items to a worker
//! thread. [`channel`] layers typed, length-prefixed frames on top.
//!
//! Waiters block on the index the other side advances, so a writer sleeping
//! for space is woken by the reader's next shift and vice versa. Waits are
//! bounded by the caller's timeout; a timed-out operation changes nothing.

mod blocking;
pub mod channel;
mod layout;
mod region;
mod suspend;
mod wait;

pub use blocking::BlockingRingBuffer;
pub use channel::{
    AsyncItemSender, AsyncReceiver, AsyncSender, BlockingReceiver, BlockingSender,
    async_to_blocking, item_channel,
};
pub use layout::{CONTROL_BYTES, RingState, region_len};
pub use region::SharedRegion;
pub use suspend::AsyncRingBuffer;
