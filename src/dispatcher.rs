//! Inbound read loop for a receiver connection.
//!
//! One dispatcher task runs per connection. It reads raw chunks, decodes
//! them into envelopes and routes each by `type` alone:
//!
//! ```text
//! ConnectionReader ──chunk──► FrameDecoder ──Message──┬── notify ──► NotificationHub
//!                                                     ├── result ──► ReplyQueue
//!                                                     └── set/get ─► dropped (logged)
//! ```
//!
//! A malformed frame is logged and skipped. The loop ends on end of stream,
//! a read error, the connection being closed from the write side, or
//! cancellation. However it ends (even if the task is aborted) the
//! connection is marked `Closed` and every request still waiting on the
//! reply queue fails with `ConnectionLost`.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionReader, ConnectionState, ReadChunk, SharedConnectionState};
use crate::error::ClientError;
use crate::notify::NotificationHub;
use crate::protocol::{FrameDecoder, Message, MessageKind};
use crate::reply_queue::ReplyQueue;

/// Why the dispatcher stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The receiver closed the stream.
    EndOfStream,
    /// Reading from the stream failed.
    ReceiveError,
    /// The connection was closed from our side (write failure or `close`).
    ConnectionClosed,
    /// Cancelled through the client's shutdown token.
    Shutdown,
}

/// Destinations for decoded frames.
#[derive(Debug, Clone)]
pub struct DispatchTargets {
    /// Receives `notify` frames.
    pub notifications: Arc<NotificationHub>,
    /// Receives `result` frames.
    pub replies: Arc<ReplyQueue>,
}

/// Spawn the dispatcher for `reader` on the current tokio runtime.
pub fn spawn(
    reader: ConnectionReader,
    targets: DispatchTargets,
    state: SharedConnectionState,
    cancel: CancellationToken,
) -> JoinHandle<DispatchExit> {
    tokio::spawn(run(reader, targets, state, cancel))
}

/// Run the read loop until the stream ends or `cancel` fires.
pub async fn run(
    mut reader: ConnectionReader,
    targets: DispatchTargets,
    state: SharedConnectionState,
    cancel: CancellationToken,
) -> DispatchExit {
    let peer = reader.peer().to_string();
    let _on_exit = {
        let state = state.clone();
        let replies = Arc::clone(&targets.replies);
        scopeguard::guard((), move |()| {
            state.set(ConnectionState::Closed);
            replies.close();
        })
    };

    log::debug!("[Dispatcher] Listening on {}", peer);
    let mut decoder = FrameDecoder::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                log::debug!("[Dispatcher] Shutdown requested for {}", peer);
                return DispatchExit::Shutdown;
            }
            () = state.closed() => {
                log::debug!("[Dispatcher] Connection {} closed locally", peer);
                return DispatchExit::ConnectionClosed;
            }
            chunk = reader.read_chunk() => chunk,
        };

        match chunk {
            Ok(ReadChunk::Data(bytes)) => {
                for frame in decoder.feed(bytes) {
                    route(frame, &targets);
                }
            }
            Ok(ReadChunk::EndOfStream) => {
                if decoder.has_partial() {
                    log::warn!("[Dispatcher] {} closed mid-frame, discarding partial data", peer);
                }
                log::info!("[Dispatcher] {} closed the connection", peer);
                return DispatchExit::EndOfStream;
            }
            Err(e) => {
                log::error!("[Dispatcher] Read error on {}: {}", peer, e);
                return DispatchExit::ReceiveError;
            }
        }
    }
}

/// Route one decoded frame by its `type`.
fn route(frame: Result<Message, ClientError>, targets: &DispatchTargets) {
    let message = match frame {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[Dispatcher] Skipping frame: {}", e);
            return;
        }
    };

    match message.kind {
        MessageKind::Notify => {
            log::debug!("[Dispatcher] notify {}", message.feature);
            targets.notifications.dispatch(&message);
        }
        MessageKind::Result => {
            log::debug!("[Dispatcher] result {}", message.feature);
            targets.replies.push(message);
        }
        MessageKind::Set | MessageKind::Get => {
            log::warn!(
                "[Dispatcher] Receiver sent client-only frame type '{}' for {}, dropping",
                message.kind,
                message.feature
            );
        }
    }
}
