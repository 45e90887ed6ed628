use std::task::Poll;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::{Envelope, ParseEnvelopeError};
use crate::ws::channel::WebsocketClient;

/// Error of one received frame, only [`Websocket`](EnvelopeStreamSinkError::Websocket) ends the connection
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
pub enum EnvelopeStreamSinkError {
    /// socket read failed, connection is gone
    #[snafu(display("websocket read failed: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// ping, pong or close frame, no envelope inside
    #[snafu(display("frame carries no envelope"))]
    ControlFrame,

    /// text or binary frame is not a valid envelope
    #[snafu(display("invalid envelope: {source}"))]
    ParseEnvelopeFailed {
        /// source error
        source: ParseEnvelopeError,
    },
}

impl EnvelopeStreamSinkError {
    /// true when no more envelopes will arrive on this connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Websocket { .. })
    }
}

/// Push channel connection speaking the envelope protocol.
///
/// Reading yields one [`Envelope`] per data frame: text frames hold plain JSON, binary frames
/// hold zlib-compressed JSON when the server compresses. Writing always sends text frames.
#[derive(Debug)]
pub struct EnvelopeStreamSink {
    ws: WebsocketClient,
    compress: bool,
}

impl EnvelopeStreamSink {
    /// Wrap an established connection, `compress` tells whether binary frames are zlib streams
    pub fn new(ws: WebsocketClient, compress: bool) -> Self {
        Self { ws, compress }
    }

    fn decode(data: Bytes, compressed: bool) -> Result<Envelope, EnvelopeStreamSinkError> {
        Envelope::decode(data.clone(), compressed).map_err(|e| {
            log::trace!(
                "Parse failed frame data: {}",
                std::str::from_utf8(&data).unwrap_or("<not-utf8-binary>")
            );
            EnvelopeStreamSinkError::ParseEnvelopeFailed { source: e }
        })
    }
}

impl Stream for EnvelopeStreamSink {
    type Item = Result<Envelope, EnvelopeStreamSinkError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        match self.ws.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(frame)) => {
                let frame = frame.context(error::Websocket)?;
                let result = match frame {
                    websocket::Message::Text(text) => Self::decode(text.into(), false),
                    websocket::Message::Binary(data) => Self::decode(data.into(), self.compress),
                    _ => Err(EnvelopeStreamSinkError::ControlFrame),
                };
                Poll::Ready(Some(result))
            }
        }
    }
}

impl Sink<Envelope> for EnvelopeStreamSink {
    type Error = websocket::Error;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_ready_unpin(cx)
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Envelope) -> Result<(), Self::Error> {
        self.ws.start_send_unpin(websocket::Message::Text(item.encode()))
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_close_unpin(cx)
    }
}
