//! Sony CIS-IP2 receiver control client.
//!
//! This crate talks to an audio/video receiver over its CIS-IP2 control
//! port: querying and changing named features, and receiving unsolicited
//! state-change notifications on the same TCP connection.
//!
//! # Architecture
//!
//! One connection carries both request/reply traffic and notifications:
//!
//! - **Connection** - owns the TCP stream, serializes frame writes
//! - **Dispatcher** - background task demultiplexing inbound frames by type
//! - **ReplyQueue** - FIFO hand-off of `result` frames to waiting requests
//! - **NotificationHub** - callback / broadcast delivery of `notify` frames
//! - **RequestThrottle** - bounds requests outstanding at once (default 2)
//! - **FeatureClient** - `get` / `set` on top of all of the above
//!
//! # Modules
//!
//! - [`protocol`] - JSON envelope codec and stream decoder
//! - [`connection`] - transport and lifecycle state
//! - [`client`] - public client API
//! - [`config`] - configuration loading
//! - [`template`] - `{{NAME}}` command templates and value domains

pub mod client;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod reply_queue;
pub mod template;
pub mod throttle;

// Re-export commonly used types
pub use client::{FeatureClient, SetResult};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState};
pub use error::ClientError;
pub use protocol::{Message, MessageKind, RequestKind};
