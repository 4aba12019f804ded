//! # objectloader
//!
//! Client-side loader for content-addressed object graphs.
//!
//! ## Design Philosophy
//!
//! objectloader is designed to be:
//! - **Round-trip frugal** - Ids requested close together travel in one batch request
//! - **Streaming** - Items reach the consumer as their response lines arrive
//! - **Injectable** - Network access and logging are traits, so tests and embedders swap them
//! - **Thread-crossing** - A shared-memory ring hands items to a worker thread without locks
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use objectloader::{AsyncHandoffQueue, BatchDownloader, Item, LoaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoaderConfig::new("https://objects.example.com", "project", "root-id")
//!         .with_token("secret");
//!     let downloader = BatchDownloader::with_http(config)?;
//!
//!     let root = downloader.download_single(None).await?;
//!     let children: Vec<String> = root.payload["children"]
//!         .as_array()
//!         .map(|c| c.iter().filter_map(|v| v.as_str().map(String::from)).collect())
//!         .unwrap_or_default();
//!
//!     let queue: AsyncHandoffQueue<Item> = AsyncHandoffQueue::new();
//!     downloader.initialize(Arc::new(queue.clone()), children.len(), None)?;
//!     for id in children {
//!         downloader.add(id)?;
//!     }
//!
//!     let mut items = Box::pin(queue.consume());
//!     while let Some(item) = items.next().await {
//!         println!("{} ({:?})", item.id, item.speckle_type());
//!     }
//!
//!     downloader.dispose_async().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batched object downloader
pub mod downloader;
/// Error types
pub mod error;
/// Injectable network call
pub mod fetch;
/// Injectable logging callback
pub mod logging;
/// In-process handoff queue
pub mod queue;
/// Shared-memory ring buffer and framed channels
pub mod ring;
/// Item sink contract
pub mod sink;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{BatchConfig, ChannelConfig, LoaderConfig};
pub use downloader::BatchDownloader;
pub use error::{Error, ProtocolError, Result};
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, Method};
pub use logging::{LogLevel, Logger, SharedLogger, TracingLogger};
pub use queue::AsyncHandoffQueue;
pub use ring::{
    AsyncItemSender, AsyncReceiver, AsyncRingBuffer, AsyncSender, BlockingReceiver,
    BlockingRingBuffer, BlockingSender, RingState, SharedRegion, item_channel,
};
pub use sink::ItemSink;
pub use types::{Item, ObjectId, RAW_ENCODING_MARKER};
