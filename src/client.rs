//! Public request/response surface over one receiver connection.
//!
//! # Request flow
//!
//! ```text
//! get/set ──► RequestThrottle::acquire ──► encode_request
//!                                              │
//!                     Connection::write_and_then(frame, ReplyQueue::reserve)
//!                                              │
//!                                    ReplySlot::wait (optional timeout)
//!                                              │
//!                              reply value ──► sentinel mapping
//! ```
//!
//! The reply slot is reserved while the write lock is still held, so the
//! order of consumers in the reply queue matches the order of requests on
//! the wire. With a receiver that answers in order, each request gets its
//! own reply even with two requests outstanding, and a reply that arrives
//! after its request timed out is discarded rather than handed on.
//!
//! # Usage
//!
//! ```ignore
//! let client = FeatureClient::connect(&ClientConfig::new("192.168.1.40")).await?;
//! client.register_notification_callback(|msg| println!("{} -> {:?}", msg.feature, msg.value));
//!
//! let volume = client.get("main.volumestep").await?;
//! let result = client.set("power", "on").await?;
//! client.shutdown().await;
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::constants::{UNKNOWN_RESPONSE, UNKNOWN_VALUE};
use crate::dispatcher::{self, DispatchExit, DispatchTargets};
use crate::error::ClientError;
use crate::notify::NotificationHub;
use crate::protocol::{encode_request, Message, RequestKind};
use crate::reply_queue::ReplyQueue;
use crate::throttle::RequestThrottle;

/// Outcome of a `set` request as reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResult {
    /// Command accepted.
    Ack,
    /// Command refused.
    Nak,
    /// Command failed.
    Err,
    /// The reply value was absent or not recognised.
    Unknown,
}

impl SetResult {
    /// Classify a reply value.
    pub fn from_reply(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("ACK") => Self::Ack,
            Some("NAK") => Self::Nak,
            Some("ERR") => Self::Err,
            _ => Self::Unknown,
        }
    }

    /// Wire text (`ACK`, `NAK`, `ERR`) or `Unknown Response`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Err => "ERR",
            Self::Unknown => UNKNOWN_RESPONSE,
        }
    }

    /// True if the receiver accepted the command.
    pub fn is_ack(self) -> bool {
        self == Self::Ack
    }
}

impl std::fmt::Display for SetResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a `get` reply value, falling back to `Unknown Value`.
fn render_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => UNKNOWN_VALUE.to_string(),
    }
}

/// Client for one receiver connection.
///
/// All methods take `&self`; share the client across tasks with `Arc`.
pub struct FeatureClient {
    connection: Connection,
    throttle: RequestThrottle,
    replies: Arc<ReplyQueue>,
    notifications: Arc<NotificationHub>,
    request_timeout: Option<Duration>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<DispatchExit>>>,
}

impl std::fmt::Debug for FeatureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureClient")
            .field("connection", &self.connection)
            .field("max_in_flight", &self.throttle.capacity())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl FeatureClient {
    /// Connect to the receiver described by `config` and start dispatching.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the TCP connection cannot be made.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let connection = Connection::connect(&config.host, config.port, config.connect_timeout())
            .await?
            .with_read_buffer_size(config.read_buffer_size);
        Ok(Self::from_connection(connection, config))
    }

    /// Start a client over an already-open connection.
    ///
    /// Spawns the dispatcher, so this must run inside a tokio runtime. If
    /// the connection's reader was already taken, the client starts out
    /// closed and every request fails with `ConnectionLost`.
    pub fn from_connection(connection: Connection, config: &ClientConfig) -> Self {
        let replies = Arc::new(ReplyQueue::new());
        let notifications = Arc::new(NotificationHub::new());
        let cancel = CancellationToken::new();

        let handle = if let Some(reader) = connection.take_reader() {
            let targets = DispatchTargets {
                notifications: Arc::clone(&notifications),
                replies: Arc::clone(&replies),
            };
            Some(dispatcher::spawn(
                reader,
                targets,
                connection.state().clone(),
                cancel.clone(),
            ))
        } else {
            log::error!("[Client] Reader for {} already taken, client unusable", connection.peer());
            connection.state().set(ConnectionState::Closed);
            replies.close();
            None
        };

        Self {
            connection,
            throttle: RequestThrottle::new(config.max_in_flight),
            replies,
            notifications,
            request_timeout: config.request_timeout(),
            cancel,
            dispatcher: Mutex::new(handle),
        }
    }

    /// Send one request and wait for the next reply.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Send`] if the frame could not be written.
    /// - [`ClientError::ConnectionLost`] if the connection closed first.
    /// - [`ClientError::Timeout`] if a request timeout is configured and expires.
    pub async fn request(
        &self,
        kind: RequestKind,
        feature: &str,
        value: Option<Value>,
    ) -> Result<Message, ClientError> {
        let _permit = self.throttle.acquire().await?;

        let frame = encode_request(kind, feature, value.as_ref());
        log::debug!("[Client] -> {:?} {}", kind, feature);
        let slot = self
            .connection
            .write_and_then(&frame, || self.replies.reserve())
            .await?;

        let reply = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, slot.wait())
                .await
                .map_err(|_elapsed| ClientError::Timeout(limit))??,
            None => slot.wait().await?,
        };
        log::debug!("[Client] <- {} {:?}", feature, reply.value);
        Ok(reply)
    }

    /// Query a feature.
    ///
    /// Returns the reply value as text, or `"Unknown Value"` when the reply
    /// carries no usable value.
    ///
    /// # Errors
    ///
    /// Connection-level failures only; see [`FeatureClient::request`].
    pub async fn get(&self, feature: &str) -> Result<String, ClientError> {
        let reply = self.request(RequestKind::Get, feature, None).await?;
        Ok(render_value(reply.value.as_ref()))
    }

    /// Change a feature.
    ///
    /// # Errors
    ///
    /// Connection-level failures only; see [`FeatureClient::request`].
    pub async fn set(&self, feature: &str, value: impl Into<Value>) -> Result<SetResult, ClientError> {
        let reply = self.request(RequestKind::Set, feature, Some(value.into())).await?;
        Ok(SetResult::from_reply(reply.value.as_ref()))
    }

    /// Replace the notification callback.
    ///
    /// The callback runs on the dispatcher task; keep it short.
    pub fn register_notification_callback<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.notifications.register(Arc::new(callback));
    }

    /// Remove the notification callback.
    pub fn clear_notification_callback(&self) {
        self.notifications.clear();
    }

    /// Receive notifications as a stream instead of (or as well as) a callback.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.notifications.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state().get()
    }

    /// Resolves once the connection is closed for any reason.
    pub async fn closed(&self) {
        self.connection.state().closed().await;
    }

    /// Permits currently free in the request throttle.
    pub fn available_permits(&self) -> usize {
        self.throttle.available()
    }

    /// Stop the dispatcher and close the connection.
    ///
    /// Pending and future requests fail with `ConnectionLost`. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.throttle.close();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(exit) => log::info!("[Client] Dispatcher for {} stopped: {:?}", self.connection.peer(), exit),
                Err(e) => log::warn!("[Client] Dispatcher for {} failed: {}", self.connection.peer(), e),
            }
        }

        self.connection.close().await;
    }
}

impl Drop for FeatureClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
