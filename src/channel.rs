//! Push channel abstraction.
//!
//! A push channel is a persistent bidirectional connection the server uses to send updates
//! proactively. The client only talks to it through [`PushChannel`], so the websocket
//! implementation in [`ws`](crate::ws) can be swapped.

use std::{fmt::Debug, time::Duration};

use serde_json::Value;
use snafu::prelude::*;
use tokio_tungstenite::tungstenite;

/// Error of channel transport
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(transport_error), context(suffix(false)))]
pub enum TransportError {
    /// push url is not a valid url
    #[snafu(display("push url {url} is invalid: {source}"))]
    InvalidURL {
        /// input url
        url: String,
        /// source error
        source: url::ParseError,
    },

    /// push url schema is not websocket
    #[snafu(display("push url {url} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// input url
        url: String,
        /// invalid schema
        schema: String,
    },

    /// push url has no host
    #[snafu(display("push url {url} has no host"))]
    NoHost {
        /// input url
        url: String,
    },

    /// connect to server failed
    #[snafu(display("connect {url} failed: {source}"))]
    Connect {
        /// connected url
        url: String,
        /// source error
        source: tungstenite::Error,
    },

    /// connect to server not finished in time
    #[snafu(display("connect {url} timeout after {timeout:?}"))]
    ConnectTimeout {
        /// connected url
        url: String,
        /// waited duration
        timeout: Duration,
    },

    /// send frame failed
    #[snafu(display("send {name} frame failed: {source}"))]
    Send {
        /// event name
        name: String,
        /// source error
        source: tungstenite::Error,
    },

    /// emit when channel is not connected
    #[snafu(display("push channel is not connected"))]
    NotConnected,
}

/// Lifecycle and domain events fired by a push channel
#[derive(Debug)]
pub enum ChannelEvent {
    /// connection established (`connect`)
    Connected,
    /// connection lost or connect attempt failed (`disconnect`)
    Disconnected,
    /// transport reported an error (`connect_error`), does not imply disconnect by itself
    ConnectError(TransportError),
    /// server sent a named event
    Message {
        /// event name
        name: String,
        /// event payload
        payload: Value,
    },
}

/// Bidirectional server push channel.
///
/// Outcomes of [`connect`](PushChannel::connect) are reported through
/// [`next_event`](PushChannel::next_event): [`ChannelEvent::Connected`] on success,
/// [`ChannelEvent::Disconnected`] (maybe after a [`ChannelEvent::ConnectError`]) on failure.
#[async_trait::async_trait]
pub trait PushChannel: Debug + Send {
    /// start a connect attempt, returns without waiting the dial to finish
    async fn connect(&mut self);

    /// close connection, no event will be fired for it
    async fn disconnect(&mut self);

    /// send a named event to server
    async fn emit(&mut self, name: &str, payload: Value) -> Result<(), TransportError>;

    /// wait next channel event, `None` means the channel will not fire events anymore
    async fn next_event(&mut self) -> Option<ChannelEvent>;
}
