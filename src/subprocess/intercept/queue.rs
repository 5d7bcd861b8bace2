//! Relay queue between a stream producer and its consumer
//!
//! The queue is unbounded and FIFO. An entry counts as in flight from the
//! moment it is enqueued until the consumer asks for the following entry, so
//! [`RelayQueue::drain`] only returns once every line has been fully handed
//! to the sinks. A drain also ends, with an error, once the reader is gone
//! and can no longer handle what is left.

use futures::stream::{self, Stream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::error::InterceptError;
use super::types::RelayEntry;

struct Shared {
    pending: AtomicUsize,
    delivered: AtomicUsize,
    reader_closed: AtomicBool,
    // woken when pending hits zero or the reader goes away
    drained: Notify,
}

impl Shared {
    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Single-producer, single-consumer line queue with an end-of-stream marker.
///
/// Cloning yields another handle to the same queue; the producer and the
/// controller each hold one.
#[derive(Clone)]
pub struct RelayQueue {
    sender: mpsc::UnboundedSender<RelayEntry>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<RelayEntry>>>>,
    // set once the sentinel went in; guards every send
    sealed: Arc<Mutex<bool>>,
    shared: Arc<Shared>,
}

impl Default for RelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            sealed: Arc::new(Mutex::new(false)),
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
                reader_closed: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    /// Append an entry without blocking.
    ///
    /// Anything enqueued after the sentinel, including a second sentinel, is
    /// rejected with [`InterceptError::EnqueueAfterSentinel`]. If the reader
    /// is gone the entry is discarded.
    pub fn enqueue(&self, entry: RelayEntry) -> Result<(), InterceptError> {
        let mut sealed = self.sealed.lock().unwrap_or_else(PoisonError::into_inner);
        if *sealed {
            return Err(InterceptError::EnqueueAfterSentinel);
        }
        if entry.is_sentinel() {
            *sealed = true;
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(entry)) = self.sender.send(entry) {
            tracing::trace!("Relay reader is gone, discarding {:?}", entry);
            self.shared.complete_one();
        }
        Ok(())
    }

    /// Shorthand for enqueuing a line
    pub fn push_line(&self, line: impl Into<String>) -> Result<(), InterceptError> {
        self.enqueue(RelayEntry::line(line))
    }

    /// Enqueue the end-of-stream marker
    pub fn seal(&self) -> Result<(), InterceptError> {
        self.enqueue(RelayEntry::Sentinel)
    }

    /// Whether the end-of-stream marker has been enqueued
    pub fn is_sealed(&self) -> bool {
        *self.sealed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of entries enqueued but not yet fully handled
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lines the reader has fully handled
    pub fn delivered(&self) -> usize {
        self.shared.delivered.load(Ordering::Acquire)
    }

    /// Take the reading side of the queue.
    ///
    /// There is exactly one reader per queue; a second call fails with
    /// [`InterceptError::AlreadyConsumed`].
    pub fn iterate(&self) -> Result<RelayReceiver, InterceptError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(InterceptError::AlreadyConsumed)?;

        Ok(RelayReceiver {
            receiver,
            shared: Arc::clone(&self.shared),
            in_hand: false,
            finished: false,
        })
    }

    /// Wait until every enqueued entry has been handled.
    ///
    /// With `None` this waits without bound. With `Some(limit)` it fails with
    /// [`InterceptError::DrainTimeout`] once `limit` elapses. If the reader
    /// ends while entries are left it fails at once with
    /// [`InterceptError::ReaderClosed`].
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<(), InterceptError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_until_empty())
                .await
                .map_err(|_| InterceptError::DrainTimeout(limit))?,
            None => self.wait_until_empty().await,
        }
    }

    /// [`drain`](Self::drain) against an absolute deadline.
    ///
    /// A deadline that already passed still checks the queue once.
    pub async fn drain_until(&self, deadline: Instant) -> Result<(), InterceptError> {
        let limit = deadline.saturating_duration_since(Instant::now());
        tokio::time::timeout_at(deadline, self.wait_until_empty())
            .await
            .map_err(|_| InterceptError::DrainTimeout(limit))?
    }

    async fn wait_until_empty(&self) -> Result<(), InterceptError> {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            // register before checking so a completion in between is not lost
            notified.as_mut().enable();

            let pending = self.shared.pending.load(Ordering::Acquire);
            if pending == 0 {
                return Ok(());
            }
            if self.shared.reader_closed.load(Ordering::Acquire) {
                return Err(InterceptError::ReaderClosed(pending));
            }
            notified.await;
        }
    }
}

/// Reading side of a [`RelayQueue`]
pub struct RelayReceiver {
    receiver: mpsc::UnboundedReceiver<RelayEntry>,
    shared: Arc<Shared>,
    in_hand: bool,
    finished: bool,
}

impl RelayReceiver {
    /// Next line, waiting while the queue is empty.
    ///
    /// Returns `None` after the sentinel. An error entry is returned once as
    /// `Some(Err(..))` and ends the sequence.
    pub async fn next(&mut self) -> Option<Result<String, InterceptError>> {
        if self.in_hand {
            self.in_hand = false;
            self.shared.delivered.fetch_add(1, Ordering::AcqRel);
            self.shared.complete_one();
        }
        if self.finished {
            return None;
        }

        let entry = self.receiver.recv().await?;
        match entry {
            RelayEntry::Line(line) => {
                self.in_hand = true;
                Some(Ok(line))
            }
            RelayEntry::Sentinel => {
                self.finished = true;
                self.shared.complete_one();
                None
            }
            RelayEntry::Error(err) => {
                self.finished = true;
                self.shared.complete_one();
                Some(Err(err))
            }
        }
    }

    /// Adapt the receiver into a lazy stream of lines
    pub fn into_stream(self) -> impl Stream<Item = Result<String, InterceptError>> + Send {
        stream::unfold(self, |mut receiver| async move {
            let item = receiver.next().await?;
            Some((item, receiver))
        })
    }
}

impl Drop for RelayReceiver {
    fn drop(&mut self) {
        self.shared.reader_closed.store(true, Ordering::Release);
        self.shared.drained.notify_waiters();
    }
}
