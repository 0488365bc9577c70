//! Protocol-wide constants for the CIS-IP2 client.
//!
//! Grouped by concern so the defaults used by [`crate::config`] and the
//! sentinels returned by [`crate::client`] live in one place.

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// TCP port the receiver listens on for CIS-IP2 control connections.
pub const DEFAULT_PORT: u16 = 33336;

/// Maximum number of requests allowed on the wire without a reply.
///
/// The receiver accepts two outstanding commands per connection.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Upper bound on how long `connect` waits for the TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of a single read from the transport.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// How long `close` waits for a busy writer before skipping the write-half
/// shutdown.
pub const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Framing
// ============================================================================

/// Largest partial JSON document the decoder buffers before giving up on it.
///
/// Receiver envelopes are a few dozen bytes; anything near this size is
/// garbage on the stream.
pub const MAX_PENDING_FRAME_BYTES: usize = 64 * 1024;

// ============================================================================
// Notifications
// ============================================================================

/// Capacity of the notification broadcast channel.
///
/// Slow subscribers past this many messages observe `RecvError::Lagged`.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Sentinels
// ============================================================================

/// Returned by `get` when the reply carries no usable value.
pub const UNKNOWN_VALUE: &str = "Unknown Value";

/// Returned by `set` when the reply is not one of `ACK`, `NAK`, `ERR`.
pub const UNKNOWN_RESPONSE: &str = "Unknown Response";
