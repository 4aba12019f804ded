//! In-process FIFO handoff between a producer and a lazily-iterating consumer.
//!
//! [`AsyncHandoffQueue`] buffers pushed items until a consumer asks for them.
//! A consumer that runs ahead of the producer suspends on a
//! [`tokio::sync::Notify`] and is resumed by the next `push`, so nobody ever
//! polls. Disposal closes the queue: buffered items still drain, then every
//! cursor ends instead of waiting forever.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use futures::stream::Stream;
use tokio::sync::Notify;

struct State<T> {
    buffer: VecDeque<T>,
    disposed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// FIFO handoff queue with a lazy, suspend-on-empty consumer
///
/// Cloning yields another handle to the same queue. Each item is delivered
/// to exactly one consumer cursor, in push order.
pub struct AsyncHandoffQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncHandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for AsyncHandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AsyncHandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandoffQueue")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T> AsyncHandoffQueue<T> {
    /// Create an empty, open queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::new(),
                    disposed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an item and wake a waiting consumer
    ///
    /// Returns `false` (dropping the item) once the queue is disposed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.lock();
            if state.disposed {
                return false;
            }
            state.buffer.push_back(item);
        }
        self.shared.notify.notify_one();
        true
    }

    /// Take the next item, suspending until one is pushed
    ///
    /// Returns `None` once the queue is disposed and drained.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes this cursor.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.buffer.pop_front() {
                    let more = !state.buffer.is_empty();
                    drop(state);
                    if more {
                        // Pass the baton so a sibling cursor does not sleep
                        // on a non-empty buffer.
                        self.shared.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.disposed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Lazy sequence over arriving items
    ///
    /// The stream is unbounded while the queue is open and ends after
    /// disposal once the buffer is drained.
    pub fn consume(&self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self.clone(), |queue| async move {
            let item = queue.next().await?;
            Some((item, queue))
        })
    }

    /// Close the queue
    ///
    /// Suspended consumers resolve to end-of-sequence after draining what
    /// is buffered; later pushes are ignored. Calling this again is a no-op.
    pub async fn dispose_async(&self) {
        self.close();
    }

    /// Synchronous form of [`dispose_async`](Self::dispose_async)
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        self.shared.notify.notify_waiters();
        // Covers a cursor that registered but has not reached its await yet
        self.shared.notify.notify_one();
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has been disposed
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}
