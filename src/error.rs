//! crate error types

use snafu::prelude::*;

use crate::{
    api::Error as APIError, channel::TransportError, event::UpdateKind, sink::SinkError,
};

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate error type.
///
/// Construction errors are returned to caller, runtime errors are never fatal and only reach
/// the [`UpdateSink::on_error`](crate::UpdateSink::on_error) callback.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Create http api client failed
    #[snafu(display("create api client failed: {source}"))]
    CreateAPIClientFailed {
        /// source error
        source: APIError,
    },

    /// Create push channel failed
    #[snafu(display("create push channel failed: {source}"))]
    CreatePushChannelFailed {
        /// source error
        source: TransportError,
    },

    /// No fetcher given to client builder
    #[snafu(display("realtime client needs an update fetcher"))]
    NoFetcher,

    /// Reconnect delay is zero
    #[snafu(display("reconnect delay must be greater than zero"))]
    ReconnectDelayZero,

    /// Poll interval is zero
    #[snafu(display("poll interval must be greater than zero"))]
    PollIntervalZero,

    /// Push channel transport failed
    #[snafu(display("push channel transport failed: {source}"))]
    TransportFailed {
        /// source error
        source: TransportError,
    },

    /// Fallback http fetch failed
    #[snafu(display("fetch {kind} update failed: {source}"))]
    FetchFailed {
        /// requested data set
        kind: UpdateKind,
        /// source error
        source: APIError,
    },

    /// Sink returned error when handle update
    #[snafu(display("sink failed: {source}"))]
    SinkFailed {
        /// source error
        source: SinkError,
    },

    /// Sink panicked when handle update
    #[snafu(display("sink panicked when handle {tag} event: {message}"))]
    SinkPanicked {
        /// event tag
        tag: &'static str,
        /// panic message
        message: String,
    },
}
