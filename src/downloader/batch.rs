//! One batch request: build it, stream the response, deliver items

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::fetch::{FetchRequest, Fetcher, Method};
use crate::logging::{LogLevel, SharedLogger};
use crate::sink::ItemSink;
use crate::types::{Item, ObjectId, contains_raw_encoding};

use super::lines::LineSplitter;

/// Lines decoded between cooperative yields
const YIELD_EVERY_LINES: usize = 1000;

/// Missing ids named in a [`Error::MissingObjects`]
const MISSING_SAMPLE_LEN: usize = 10;

/// Headers every request carries: bearer token plus caller pass-throughs
pub(crate) fn base_headers(config: &LoaderConfig) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(config.headers.len() + 3);
    if let Some(token) = &config.token {
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
    }
    let mut custom: Vec<_> = config.headers.iter().collect();
    custom.sort();
    headers.extend(custom.into_iter().map(|(k, v)| (k.clone(), v.clone())));
    headers
}

/// Build the POST that asks for every id in `ids`
///
/// The id list travels as a JSON array encoded into a string field.
pub(crate) fn batch_request(config: &LoaderConfig, ids: &[ObjectId]) -> Result<FetchRequest> {
    let objects = serde_json::to_string(ids)?;
    let body = serde_json::json!({ "objects": objects }).to_string();

    let mut headers = base_headers(config);
    headers.push(("Content-Type".to_string(), "application/json".to_string()));
    headers.push(("Accept".to_string(), "text/plain".to_string()));

    Ok(FetchRequest {
        method: Method::Post,
        url: config.batch_url(),
        headers,
        body: Some(body),
    })
}

/// Decode one `<id>\t<json>` line; `Ok(None)` for blank lines
pub(crate) fn parse_line(line: &[u8]) -> Result<Option<Item>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let tab = line
        .iter()
        .position(|&b| b == b'\t')
        .ok_or_else(|| ProtocolError::MissingSeparator {
            line: String::from_utf8_lossy(line).into_owned(),
        })?;

    let id = std::str::from_utf8(&line[..tab]).map_err(|_| ProtocolError::InvalidUtf8 {
        id: String::from_utf8_lossy(&line[..tab]).into_owned(),
    })?;
    let json = &line[tab + 1..];

    if contains_raw_encoding(json) {
        return Err(Error::RawEncoded { id: id.to_string() });
    }

    let text = std::str::from_utf8(json).map_err(|_| ProtocolError::InvalidUtf8 {
        id: id.to_string(),
    })?;
    Item::from_json(id, text).map(Some)
}

/// State shared by every batch of one initialized downloader
pub(crate) struct BatchContext {
    pub(crate) config: Arc<LoaderConfig>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) logger: SharedLogger,
    pub(crate) sink: Arc<dyn ItemSink>,
    pub(crate) total_expected: usize,
    pub(crate) delivered: Arc<AtomicUsize>,
    pub(crate) sink_closed: Arc<AtomicBool>,
    pub(crate) limiter: Arc<Semaphore>,
    pub(crate) cancel: CancellationToken,
}

impl BatchContext {
    /// Close the sink exactly once
    pub(crate) async fn close_sink(&self) {
        if !self.sink_closed.swap(true, Ordering::AcqRel) {
            self.sink.close().await;
        }
    }

    async fn deliver(&self, item: Item) -> Result<()> {
        self.sink.push(item).await?;
        let delivered = self.delivered.fetch_add(1, Ordering::AcqRel) + 1;
        if delivered == self.total_expected {
            self.logger.log(
                LogLevel::Debug,
                &format!("all {delivered} expected objects delivered, closing sink"),
            );
            self.close_sink().await;
        }
        Ok(())
    }
}

/// Run one batch to completion, logging instead of returning failures
pub(crate) async fn run_batch(ctx: Arc<BatchContext>, ids: Vec<ObjectId>) {
    let count = ids.len();
    let _permit = tokio::select! {
        permit = Arc::clone(&ctx.limiter).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = ctx.cancel.cancelled() => return,
    };

    tracing::debug!(batch_size = count, "sending batch request");
    let outcome = tokio::select! {
        result = fetch_batch(&ctx, ids) => result,
        _ = ctx.cancel.cancelled() => Err(Error::Disposed),
    };

    match outcome {
        Ok(delivered) => {
            tracing::debug!(batch_size = count, delivered, "batch complete");
        }
        Err(Error::Disposed) => {
            tracing::debug!(batch_size = count, "batch abandoned on disposal");
        }
        Err(e) => {
            tracing::warn!(batch_size = count, error = %e, "batch failed");
            ctx.logger.log(
                LogLevel::Warn,
                &format!("batch of {count} objects failed: {e}"),
            );
        }
    }
}

/// Request `ids` and stream the decoded items into the sink
///
/// Returns how many items this batch delivered.
async fn fetch_batch(ctx: &BatchContext, ids: Vec<ObjectId>) -> Result<usize> {
    let request = batch_request(&ctx.config, &ids)?;
    let response = ctx.fetcher.fetch(request).await?.error_for_status()?;

    let mut outstanding: HashSet<ObjectId> = ids.iter().cloned().collect();
    let mut splitter = LineSplitter::new();
    let mut body = response.body;
    let mut lines = 0usize;
    let mut delivered = 0usize;

    while let Some(chunk) = body.next().await {
        splitter.feed(&chunk?);
        while let Some(line) = splitter.next_line() {
            if let Some(item) = parse_line(line)? {
                outstanding.remove(&item.id);
                ctx.deliver(item).await?;
                delivered += 1;
            }
            lines += 1;
            if lines % YIELD_EVERY_LINES == 0 {
                tokio::task::yield_now().await;
            }
        }
    }
    if let Some(line) = splitter.finish()
        && let Some(item) = parse_line(line)?
    {
        outstanding.remove(&item.id);
        ctx.deliver(item).await?;
        delivered += 1;
    }

    if !outstanding.is_empty() {
        let sample = ids
            .iter()
            .filter(|id| outstanding.contains(*id))
            .take(MISSING_SAMPLE_LEN)
            .map(|id| id.0.clone())
            .collect();
        return Err(Error::MissingObjects {
            count: outstanding.len(),
            sample,
        });
    }
    Ok(delivered)
}
