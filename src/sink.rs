//! Destination for decoded items
//!
//! The downloader pushes every decoded [`Item`] into an [`ItemSink`]. Within
//! one runtime that is an [`AsyncHandoffQueue`]; across a thread boundary it is
//! an [`AsyncItemSender`](crate::ring::AsyncItemSender) writing frames into a
//! shared ring.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::queue::AsyncHandoffQueue;
use crate::types::Item;

/// Receives decoded items from the downloader
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Deliver one item
    ///
    /// # Errors
    ///
    /// Returns an error when the sink can no longer accept items (closed,
    /// overflowed, or the receiving side stopped draining).
    async fn push(&self, item: Item) -> Result<()>;

    /// Signal that no more items will follow
    async fn close(&self);
}

#[async_trait]
impl ItemSink for AsyncHandoffQueue<Item> {
    async fn push(&self, item: Item) -> Result<()> {
        if AsyncHandoffQueue::push(self, item) {
            Ok(())
        } else {
            Err(Error::Disposed)
        }
    }

    async fn close(&self) {
        self.dispose_async().await;
    }
}
