//! Background task that coalesces requested ids into batches

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::types::ObjectId;

use super::batch::{BatchContext, run_batch};

/// Ids accumulated since the current window opened
struct PendingBatch {
    ids: Vec<ObjectId>,
    seen: HashSet<ObjectId>,
    deadline: Option<Instant>,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            ids: Vec::new(),
            seen: HashSet::new(),
            deadline: None,
        }
    }

    /// Add an id, opening the window if this is the first one
    fn push(&mut self, id: ObjectId, window: Duration) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + window);
        }
        if self.seen.insert(id.clone()) {
            self.ids.push(id);
        }
    }

    fn take(&mut self) -> Vec<ObjectId> {
        self.seen.clear();
        self.deadline = None;
        std::mem::take(&mut self.ids)
    }
}

async fn window_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Spawn the flusher for one initialized downloader
///
/// Ids arrive on `id_rx`. A window opens with the first id of a batch and is
/// not extended by later ones; when it elapses, or the batch reaches
/// `batch_size`, the ids go out as one request. On cancellation pending ids
/// are dropped and in-flight batches are awaited (they observe the same
/// token and wind down promptly).
pub(crate) fn spawn_flusher(
    ctx: Arc<BatchContext>,
    mut id_rx: mpsc::UnboundedReceiver<ObjectId>,
    window: Duration,
    batch_size: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = PendingBatch::new();
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    if !pending.ids.is_empty() {
                        tracing::debug!(dropped = pending.ids.len(), "discarding pending ids on disposal");
                    }
                    break;
                }
                msg = id_rx.recv() => {
                    let Some(id) = msg else {
                        // Downloader dropped without disposal
                        break;
                    };
                    pending.push(id, window);
                    if pending.ids.len() >= batch_size {
                        in_flight.spawn(run_batch(Arc::clone(&ctx), pending.take()));
                    }
                }
                _ = window_elapsed(pending.deadline) => {
                    let ids = pending.take();
                    if !ids.is_empty() {
                        in_flight.spawn(run_batch(Arc::clone(&ctx), ids));
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        tracing::error!(error = %e, "batch task panicked");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::error!(error = %e, "batch task panicked during shutdown");
            }
        }
    })
}
