//! Delivery of unsolicited `notify` frames.
//!
//! Two ways to observe notifications:
//!
//! - a single registered callback, invoked synchronously on the dispatcher
//!   task in wire order (never concurrently with itself);
//! - a broadcast subscription for callers that would rather consume a
//!   stream. Subscribers that fall behind see `RecvError::Lagged`.
//!
//! With neither in place, notifications are logged and dropped.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::constants::NOTIFICATION_CHANNEL_CAPACITY;
use crate::protocol::Message;

/// Callback invoked for every inbound notification.
pub type NotificationCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Holds the registered callback and the broadcast fan-out.
pub struct NotificationHub {
    callback: RwLock<Option<NotificationCallback>>,
    broadcast_tx: broadcast::Sender<Message>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("has_callback", &self.has_callback())
            .field("subscribers", &self.broadcast_tx.receiver_count())
            .finish()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    /// Create a hub with no callback and no subscribers.
    pub fn new() -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            callback: RwLock::new(None),
            broadcast_tx,
        }
    }

    /// Replace the registered callback.
    ///
    /// Takes effect for every notification dispatched after this returns.
    pub fn register(&self, callback: NotificationCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Remove the registered callback. Returns whether one was set.
    pub fn clear(&self) -> bool {
        self.callback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Whether a callback is registered.
    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to notifications as a stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.broadcast_tx.subscribe()
    }

    /// Deliver one notification. Returns `false` if nobody received it.
    pub fn dispatch(&self, message: &Message) -> bool {
        // Clone out of the lock so the callback can re-register itself
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = false;
        if let Some(callback) = callback {
            callback(message);
            delivered = true;
        }
        if self.broadcast_tx.receiver_count() > 0 && self.broadcast_tx.send(message.clone()).is_ok() {
            delivered = true;
        }

        if !delivered {
            log::info!(
                "[Notify] Unhandled notification: {} = {}",
                message.feature,
                message
                    .value
                    .as_ref()
                    .map_or_else(|| "<none>".to_string(), ToString::to_string)
            );
        }
        delivered
    }
}
