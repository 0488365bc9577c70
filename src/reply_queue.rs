//! FIFO hand-off of `result` frames from the dispatcher to waiting requests.
//!
//! The protocol carries no request id, so a reply belongs to whichever
//! request is next in line. Requests queue up as consumers via
//! [`ReplyQueue::reserve`]; the dispatcher delivers replies with
//! [`ReplyQueue::push`]. Replies that arrive with nobody waiting are kept
//! for the next consumer.
//!
//! A slot is only reserved once its request is on the wire, so every slot
//! is owed exactly one reply. An abandoned slot (timed out or cancelled)
//! keeps its place and swallows that reply when it arrives; later requests
//! stay matched to their own replies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::protocol::Message;

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<Message>,
    waiters: VecDeque<oneshot::Sender<Message>>,
    closed: bool,
}

/// Unbounded reply queue shared by the dispatcher and every in-flight request.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    inner: Mutex<Inner>,
}

/// A place in line for the next reply.
///
/// Dropping the slot (for example when the request times out) does not
/// leave the line: the reply owed to it is discarded on arrival.
#[derive(Debug)]
pub struct ReplySlot {
    rx: oneshot::Receiver<Message>,
}

impl ReplySlot {
    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] if the queue is closed before
    /// a reply reaches this slot.
    pub async fn wait(self) -> Result<Message, ClientError> {
        match self.rx.await {
            Ok(message) => Ok(message),
            Err(_closed) => Err(ClientError::ConnectionLost),
        }
    }
}

impl ReplyQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a reply to the longest-waiting consumer, or keep it for the
    /// next one.
    ///
    /// If the longest-waiting consumer was abandoned, the reply was meant
    /// for it and is dropped.
    pub fn push(&self, message: Message) {
        let mut inner = self.lock();
        match inner.waiters.pop_front() {
            Some(waiter) => {
                if let Err(orphan) = waiter.send(message) {
                    log::debug!("[Replies] Discarding reply for abandoned request: {:?}", orphan.value);
                }
            }
            None => inner.ready.push_back(message),
        }
    }

    /// Join the line for the next reply.
    ///
    /// A reply that is already queued is handed over immediately. On a
    /// closed queue with nothing buffered the slot resolves to
    /// `ConnectionLost`.
    pub fn reserve(&self) -> ReplySlot {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if let Some(message) = inner.ready.pop_front() {
            let _ = tx.send(message);
        } else if !inner.closed {
            inner.waiters.push_back(tx);
        }
        ReplySlot { rx }
    }

    /// Close the queue, failing every waiting consumer with `ConnectionLost`.
    ///
    /// Already buffered replies remain available to `reserve`.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.waiters.clear();
    }

    /// Whether [`ReplyQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered replies nobody has claimed yet.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    /// True if no replies are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of consumers currently in line, abandoned ones included.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }
}
