//! Typed, length-prefixed frames over a ring
//!
//! Each frame is a little-endian `u32` length followed by that many bytes of
//! JSON, written with a single push so a reader never sees half a frame. A
//! length of `u32::MAX` with no body marks the end of the stream.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ChannelConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::sink::ItemSink;
use crate::types::Item;

use super::layout::Deadline;
use super::{AsyncRingBuffer, BlockingRingBuffer};

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

const END_OF_STREAM: u32 = u32::MAX;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&len| len != END_OF_STREAM)
        .ok_or(Error::Overflow {
            requested: body.len(),
            capacity: END_OF_STREAM as usize - 1,
        })?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Frame length from a peeked header; `None` for the end-of-stream marker
fn body_len(header: &[u8], capacity: usize) -> Result<Option<usize>> {
    let mut raw = [0u8; FRAME_HEADER_LEN];
    raw.copy_from_slice(&header[..FRAME_HEADER_LEN]);
    let len = u32::from_le_bytes(raw);
    if len == END_OF_STREAM {
        return Ok(None);
    }
    let len = len as usize;
    if FRAME_HEADER_LEN + len > capacity {
        return Err(ProtocolError::OversizedFrame {
            length: len,
            capacity,
        }
        .into());
    }
    Ok(Some(len))
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(&frame[FRAME_HEADER_LEN..])?)
}

/// Interpret a failed push: a poisoned ring is an error, anything else a timeout
fn push_failed(overflowed: bool, requested: usize, capacity: usize) -> Result<bool> {
    if overflowed {
        Err(Error::Overflow {
            requested,
            capacity,
        })
    } else {
        Ok(false)
    }
}

/// Sending half of a channel, for async producers
pub struct AsyncSender<T> {
    ring: AsyncRingBuffer,
    send_timeout: Duration,
    _marker: PhantomData<fn(T)>,
}

/// Item channel sender; feeds a [`BatchDownloader`](crate::BatchDownloader)'s
/// output to a consumer on another thread
pub type AsyncItemSender = AsyncSender<Item>;

impl<T> Clone for AsyncSender<T> {
    fn clone(&self) -> Self {
        Self {
            ring: self.ring.clone(),
            send_timeout: self.send_timeout,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize> AsyncSender<T> {
    /// Wrap the writing side of `ring`
    ///
    /// `send_timeout` applies when the sender is used as an [`ItemSink`].
    pub fn new(ring: AsyncRingBuffer, send_timeout: Duration) -> Self {
        Self {
            ring,
            send_timeout,
            _marker: PhantomData,
        }
    }

    /// Send one value, suspending up to `timeout` for space
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] when the frame is larger than the ring (the ring is
    /// then unusable for further sends), [`Error::Serialization`] if `value`
    /// cannot be encoded.
    pub async fn send(&self, value: &T, timeout: Duration) -> Result<bool> {
        let frame = encode(value)?;
        if self.ring.push(&frame, timeout).await {
            return Ok(true);
        }
        push_failed(self.ring.is_overflowed(), frame.len(), self.ring.capacity())
    }

    /// Send values in order, stopping at the first timeout
    ///
    /// Returns how many were sent.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn send_all<'a, I>(&self, values: I, timeout: Duration) -> Result<usize>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut sent = 0;
        for value in values {
            if !self.send(value, timeout).await? {
                break;
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Write the end-of-stream marker
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] if the ring was poisoned by an earlier send.
    pub async fn close(&self, timeout: Duration) -> Result<bool> {
        if self.ring.push(&END_OF_STREAM.to_le_bytes(), timeout).await {
            return Ok(true);
        }
        push_failed(self.ring.is_overflowed(), FRAME_HEADER_LEN, self.ring.capacity())
    }
}

#[async_trait]
impl ItemSink for AsyncSender<Item> {
    async fn push(&self, item: Item) -> Result<()> {
        if self.send(&item, self.send_timeout).await? {
            Ok(())
        } else {
            Err(Error::ChannelTimeout {
                waited: self.send_timeout,
            })
        }
    }

    async fn close(&self) {
        match AsyncSender::close(self, self.send_timeout).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("timed out writing end-of-stream frame"),
            Err(e) => tracing::warn!(error = %e, "could not write end-of-stream frame"),
        }
    }
}

/// Receiving half of a channel, for async consumers
pub struct AsyncReceiver<T> {
    ring: AsyncRingBuffer,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> AsyncReceiver<T> {
    /// Wrap the reading side of `ring`
    pub fn new(ring: AsyncRingBuffer) -> Self {
        Self {
            ring,
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Receive one value, suspending up to `timeout`
    ///
    /// `Ok(None)` on timeout or once the sender has closed the stream.
    ///
    /// # Errors
    ///
    /// A frame header larger than the ring, or a body that does not decode.
    /// After a bad header the byte stream cannot be resynchronized, so the
    /// receiver reports itself closed from then on.
    pub async fn recv(&self, timeout: Duration) -> Result<Option<T>> {
        if self.is_closed() {
            return Ok(None);
        }
        let deadline = Deadline::after(timeout);
        let Some(header) = self.ring.peek(FRAME_HEADER_LEN, timeout).await else {
            return Ok(None);
        };
        let Some(len) = self.frame_len(&header)? else {
            self.ring.shift(FRAME_HEADER_LEN, Duration::ZERO).await;
            self.closed.store(true, Ordering::Release);
            return Ok(None);
        };
        // The whole frame was written in one push, so it is already here
        let wait = deadline.remaining().unwrap_or(Duration::MAX);
        match self.ring.shift(FRAME_HEADER_LEN + len, wait).await {
            Some(frame) => decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Receive up to `max` values, waiting only for the first
    ///
    /// # Errors
    ///
    /// As [`recv`](Self::recv).
    pub async fn recv_batch(&self, max: usize, timeout: Duration) -> Result<Vec<T>> {
        let mut batch = Vec::new();
        if max == 0 {
            return Ok(batch);
        }
        let Some(first) = self.recv(timeout).await? else {
            return Ok(batch);
        };
        batch.push(first);
        while batch.len() < max {
            match self.recv(Duration::ZERO).await? {
                Some(value) => batch.push(value),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Length announced by `header`; a corrupt header ends the stream
    fn frame_len(&self, header: &[u8]) -> Result<Option<usize>> {
        body_len(header, self.ring.capacity()).inspect_err(|_| {
            self.closed.store(true, Ordering::Release);
        })
    }

    /// Whether the stream has ended (end marker or corrupt header)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Sending half of a channel, for a dedicated producer thread
pub struct BlockingSender<T> {
    ring: BlockingRingBuffer,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> BlockingSender<T> {
    /// Wrap the writing side of `ring`
    pub fn new(ring: BlockingRingBuffer) -> Self {
        Self {
            ring,
            _marker: PhantomData,
        }
    }

    /// Send one value, blocking up to `timeout` for space
    ///
    /// # Errors
    ///
    /// As [`AsyncSender::send`].
    pub fn send(&self, value: &T, timeout: Duration) -> Result<bool> {
        let frame = encode(value)?;
        if self.ring.push(&frame, timeout) {
            return Ok(true);
        }
        push_failed(self.ring.is_overflowed(), frame.len(), self.ring.capacity())
    }

    /// Send values in order, stopping at the first timeout
    ///
    /// # Errors
    ///
    /// As [`AsyncSender::send`].
    pub fn send_all<'a, I>(&self, values: I, timeout: Duration) -> Result<usize>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut sent = 0;
        for value in values {
            if !self.send(value, timeout)? {
                break;
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Write the end-of-stream marker
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] if the ring was poisoned by an earlier send.
    pub fn close(&self, timeout: Duration) -> Result<bool> {
        if self.ring.push(&END_OF_STREAM.to_le_bytes(), timeout) {
            return Ok(true);
        }
        push_failed(self.ring.is_overflowed(), FRAME_HEADER_LEN, self.ring.capacity())
    }
}

/// Receiving half of a channel, for a dedicated consumer thread
pub struct BlockingReceiver<T> {
    ring: BlockingRingBuffer,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> BlockingReceiver<T> {
    /// Wrap the reading side of `ring`
    pub fn new(ring: BlockingRingBuffer) -> Self {
        Self {
            ring,
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Receive one value, blocking up to `timeout`
    ///
    /// `Ok(None)` on timeout or once the sender has closed the stream.
    ///
    /// # Errors
    ///
    /// As [`AsyncReceiver::recv`].
    pub fn recv(&self, timeout: Duration) -> Result<Option<T>> {
        if self.is_closed() {
            return Ok(None);
        }
        let deadline = Deadline::after(timeout);
        let Some(header) = self.ring.peek(FRAME_HEADER_LEN, timeout) else {
            return Ok(None);
        };
        let Some(len) = self.frame_len(&header)? else {
            self.ring.shift(FRAME_HEADER_LEN, Duration::ZERO);
            self.closed.store(true, Ordering::Release);
            return Ok(None);
        };
        let wait = deadline.remaining().unwrap_or(Duration::MAX);
        match self.ring.shift(FRAME_HEADER_LEN + len, wait) {
            Some(frame) => decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Receive up to `max` values, waiting only for the first
    ///
    /// # Errors
    ///
    /// As [`AsyncReceiver::recv`].
    pub fn recv_batch(&self, max: usize, timeout: Duration) -> Result<Vec<T>> {
        let mut batch = Vec::new();
        if max == 0 {
            return Ok(batch);
        }
        let Some(first) = self.recv(timeout)? else {
            return Ok(batch);
        };
        batch.push(first);
        while batch.len() < max {
            match self.recv(Duration::ZERO)? {
                Some(value) => batch.push(value),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Length announced by `header`; a corrupt header ends the stream
    fn frame_len(&self, header: &[u8]) -> Result<Option<usize>> {
        body_len(header, self.ring.capacity()).inspect_err(|_| {
            self.closed.store(true, Ordering::Release);
        })
    }

    /// Whether the stream has ended (end marker or corrupt header)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Blocks for each value; ends once the sender closes the stream
impl<T: DeserializeOwned> Iterator for BlockingReceiver<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv(Duration::MAX).transpose()
    }
}

/// Channel over a fresh anonymous ring: async sending half, blocking receiving half
///
/// The usual shape for handing downloaded items to a worker thread.
///
/// # Errors
///
/// Fails for an invalid capacity.
pub fn async_to_blocking<T>(
    capacity: usize,
    send_timeout: Duration,
) -> Result<(AsyncSender<T>, BlockingReceiver<T>)>
where
    T: Serialize + DeserializeOwned,
{
    let ring = AsyncRingBuffer::create(capacity)?;
    let reader = BlockingRingBuffer::from_existing(ring.region(), capacity)?;
    Ok((AsyncSender::new(ring, send_timeout), BlockingReceiver::new(reader)))
}

/// Item channel sized and timed by `config`
///
/// # Errors
///
/// Fails for an invalid capacity.
pub fn item_channel(config: &ChannelConfig) -> Result<(AsyncItemSender, BlockingReceiver<Item>)> {
    async_to_blocking(config.capacity_bytes, config.send_timeout)
}
