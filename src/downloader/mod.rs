//! Batched object downloader
//!
//! [`BatchDownloader`] turns a trickle of requested ids into a few large
//! requests. Submodules:
//! - [`flusher`] - Background task that coalesces ids into time-windowed batches
//! - [`batch`] - Batch request construction and streaming response parsing
//! - [`lines`] - Newline framing over chunked bodies

mod batch;
mod flusher;
mod lines;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::fetch::{FetchRequest, Fetcher, HttpFetcher, Method};
use crate::logging::{LogLevel, SharedLogger, TracingLogger};
use crate::sink::ItemSink;
use crate::types::{Item, ObjectId};

use batch::BatchContext;

/// Wiring created by `initialize`
struct Running {
    id_tx: mpsc::UnboundedSender<ObjectId>,
    flusher: tokio::task::JoinHandle<()>,
    ctx: Arc<BatchContext>,
}

enum Lifecycle {
    Created,
    Running(Running),
    Disposed,
}

/// Resolves object ids to payloads with as few round trips as possible
///
/// Create one per (server, project, root object). Call
/// [`initialize`](Self::initialize) with the sink that receives items, then
/// [`add`](Self::add) ids as they are discovered. Ids added within one wait
/// window go out as a single request; items stream into the sink as their
/// lines arrive. A failed batch is logged and its ids are dropped.
pub struct BatchDownloader {
    config: Arc<LoaderConfig>,
    fetcher: Arc<dyn Fetcher>,
    logger: SharedLogger,
    state: Mutex<Lifecycle>,
    delivered: Arc<AtomicUsize>,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BatchDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDownloader")
            .field("server_url", &self.config.server_url)
            .field("project_id", &self.config.project_id)
            .field("object_id", &self.config.object_id)
            .field("delivered", &self.delivered())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl BatchDownloader {
    /// Create a downloader with an injected fetcher and logger
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(config: LoaderConfig, fetcher: Arc<dyn Fetcher>, logger: SharedLogger) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            logger,
            state: Mutex::new(Lifecycle::Created),
            delivered: Arc::new(AtomicUsize::new(0)),
            disposed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a downloader that talks HTTP via `reqwest` and logs via `tracing`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn with_http(config: LoaderConfig) -> Result<Self> {
        Self::new(config, Arc::new(HttpFetcher::new()), Arc::new(TracingLogger))
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wire the sink and start the background flusher
    ///
    /// `max_batch_wait` overrides the configured window when given. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if already initialized, [`Error::Disposed`] after
    /// disposal.
    pub fn initialize(
        &self,
        sink: Arc<dyn ItemSink>,
        total_expected: usize,
        max_batch_wait: Option<Duration>,
    ) -> Result<()> {
        let mut state = self.lock();
        match *state {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => {
                return Err(Error::config("downloader is already initialized", "sink"));
            }
            Lifecycle::Disposed => return Err(Error::Disposed),
        }

        let window = max_batch_wait.unwrap_or(self.config.batch.max_batch_wait);
        let batch_size = self.config.batch.batch_size_for(total_expected);
        let ctx = Arc::new(BatchContext {
            config: Arc::clone(&self.config),
            fetcher: Arc::clone(&self.fetcher),
            logger: Arc::clone(&self.logger),
            sink,
            total_expected,
            delivered: Arc::clone(&self.delivered),
            sink_closed: Arc::new(AtomicBool::new(false)),
            limiter: Arc::new(Semaphore::new(self.config.batch.max_concurrent_batches)),
            cancel: self.cancel.child_token(),
        });

        if total_expected == 0 {
            // Nothing will ever be delivered; end the consumer's sequence now
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.close_sink().await });
        }

        let (id_tx, id_rx) = mpsc::unbounded_channel();
        let flusher = flusher::spawn_flusher(Arc::clone(&ctx), id_rx, window, batch_size);

        tracing::debug!(
            total_expected,
            batch_size,
            window_ms = window.as_millis() as u64,
            "batch downloader initialized"
        );
        *state = Lifecycle::Running(Running {
            id_tx,
            flusher,
            ctx,
        });
        Ok(())
    }

    /// Request an object
    ///
    /// Returns once the id is queued; the item arrives through the sink.
    /// After disposal this is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before [`initialize`](Self::initialize).
    pub fn add(&self, id: impl Into<ObjectId>) -> Result<()> {
        let state = self.lock();
        match &*state {
            Lifecycle::Created => Err(Error::NotInitialized),
            Lifecycle::Disposed => Ok(()),
            Lifecycle::Running(running) => {
                // Fails only if the flusher has already stopped
                let _ = running.id_tx.send(id.into());
                Ok(())
            }
        }
    }

    /// Fetch one object outside the batch path
    ///
    /// `None` fetches the root object. Raw-encoded objects resolve here.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal, transport errors for a failed
    /// request, protocol errors when the body is not the requested object.
    pub async fn download_single(&self, id: Option<&str>) -> Result<Item> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let id = id.unwrap_or(self.config.object_id.as_str());

        let mut headers = batch::base_headers(&self.config);
        headers.push(("Accept".to_string(), "text/plain".to_string()));
        let request = FetchRequest {
            method: Method::Get,
            url: self.config.single_url(id),
            headers,
            body: None,
        };

        let fetch = async {
            let response = self.fetcher.fetch(request).await?.error_for_status()?;
            let bytes = response.bytes().await?;
            let text = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 {
                id: id.to_string(),
            })?;
            let mut item = Item::from_json(id, &text)?;
            item.size = Some(0);
            Ok::<_, Error>(item)
        };

        tokio::select! {
            result = fetch => {
                if let Err(e) = &result {
                    self.logger.log(LogLevel::Warn, &format!("failed to fetch object {id}: {e}"));
                }
                result
            }
            _ = self.cancel.cancelled() => Err(Error::Disposed),
        }
    }

    /// Stop all work and release the sink
    ///
    /// Pending ids are dropped, in-flight batches are cancelled, and the sink
    /// is closed so consumers reach end of sequence. Background tasks get
    /// the configured grace period before being aborted. Safe to call more
    /// than once and before `initialize`.
    pub async fn dispose_async(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Disposed);
        let Lifecycle::Running(Running {
            id_tx,
            mut flusher,
            ctx,
        }) = previous
        else {
            return;
        };
        drop(id_tx);

        let grace = self.config.batch.dispose_timeout;
        if tokio::time::timeout(grace, &mut flusher).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "background work outlived disposal grace period, aborting"
            );
            flusher.abort();
        }
        let _ = tokio::time::timeout(grace, ctx.close_sink()).await;

        self.logger.log(
            LogLevel::Debug,
            &format!("downloader disposed after delivering {} objects", self.delivered()),
        );
    }

    /// Items delivered to the sink so far
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Acquire)
    }

    /// Whether [`dispose_async`](Self::dispose_async) has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The config this downloader was built with
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

impl Drop for BatchDownloader {
    fn drop(&mut self) {
        // Stops the flusher and any batch still running if disposal was skipped
        self.cancel.cancel();
    }
}
