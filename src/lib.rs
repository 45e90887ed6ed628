//! # cti-live
//!
//! Realtime update client of a threat-intelligence dashboard.
//!
//! Updates are pushed by server over a websocket channel. When the channel is lost the client
//! reconnects with a fixed delay, and after too many attempts falls back to polling the
//! dashboard http api for the rest of the session.

#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod event;
pub mod sink;
pub mod ws;

mod error;
pub use error::{Error, Result};

pub use channel::{ChannelEvent, PushChannel};
pub use client::{Builder, ConnectionState, RealtimeClient, ReconnectPolicy, Snapshot};
pub use config::Config;
pub use event::{UpdateEvent, UpdateKind};
pub use sink::{Handlers, Status, UpdateSink};
pub use ws::WsChannel;
