use std::{sync::Arc, time::Duration};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite as websocket;

use super::message::{Envelope, EnvelopeStreamSink};
use crate::channel::{transport_error, ChannelEvent, PushChannel, TransportError};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);

type EnvelopeSink = SplitSink<EnvelopeStreamSink, Envelope>;

/// [`PushChannel`] over a websocket connection.
///
/// Every frame is a JSON envelope `{"event": name, "data": payload}`. When created with
/// `compress`, binary frames are zlib-compressed envelopes.
///
/// [`connect`](PushChannel::connect) only starts the dial. A background task finishes it,
/// then keeps reading frames until the connection closes.
#[derive(Debug)]
pub struct WsChannel {
    url: url::Url,
    compress: bool,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    sink: Arc<Mutex<Option<EnvelopeSink>>>,
    task: Option<JoinHandle<()>>,
}

impl WsChannel {
    /// Create a channel for a `ws://` or `wss://` url, no connection is made yet
    pub fn new<S: AsRef<str> + ?Sized>(url: &S, compress: bool) -> Result<Self, TransportError> {
        let s = url.as_ref();

        let url = url::Url::parse(s).context(transport_error::InvalidURL { url: s })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            transport_error::InvalidSchema {
                url: s,
                schema: url.scheme(),
            }
        );

        ensure!(url.host().is_some(), transport_error::NoHost { url: s });

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            url,
            compress,
            event_tx,
            event_rx,
            sink: Arc::new(Mutex::new(None)),
            task: None,
        })
    }

    /// server url
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// true if a connection is established and not closed yet
    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            log::trace!("Stop push channel task");
            task.abort();
        }
    }

    async fn dial(url: url::Url) -> Result<WebsocketClient, TransportError> {
        let connecting = websocket::connect_async(&url);
        match tokio::time::timeout(CONNECT_TIMEOUT, connecting).await {
            Ok(result) => result
                .map(|(ws, _)| ws)
                .context(transport_error::Connect { url: url.as_str() }),
            Err(_) => transport_error::ConnectTimeout {
                url: url.as_str(),
                timeout: CONNECT_TIMEOUT,
            }
            .fail(),
        }
    }

    async fn run(
        url: url::Url,
        compress: bool,
        sink: Arc<Mutex<Option<EnvelopeSink>>>,
        event_tx: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        log::debug!("Connecting push channel {}", url);

        let ws = match Self::dial(url).await {
            Ok(ws) => ws,
            Err(err) => {
                log::warn!("Connect push channel failed: {}", err);
                let _ = event_tx.send(ChannelEvent::ConnectError(err));
                let _ = event_tx.send(ChannelEvent::Disconnected);
                return;
            }
        };

        log::debug!("Push channel connected");

        let (writer, mut stream) = EnvelopeStreamSink::new(ws, compress).split();
        *sink.lock().await = Some(writer);

        if event_tx.send(ChannelEvent::Connected).is_err() {
            return;
        }

        loop {
            match stream.next().await {
                Some(Ok(envelope)) => {
                    log::trace!("Received {} event", envelope.event);

                    let event = ChannelEvent::Message {
                        name: envelope.event,
                        payload: envelope.data,
                    };
                    if event_tx.send(event).is_err() {
                        log::debug!("Push channel dropped, stop");
                        return;
                    }
                }
                Some(Err(err)) if !err.is_fatal() => {
                    log::trace!("Frame error happened but ignored: {}", err);
                }
                Some(Err(err)) => {
                    log::warn!("Websocket stream broken when receive frame: {}", err);
                    break;
                }
                None => {
                    log::debug!("Websocket stream closed");
                    break;
                }
            }
        }

        sink.lock().await.take();
        let _ = event_tx.send(ChannelEvent::Disconnected);
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[async_trait::async_trait]
impl PushChannel for WsChannel {
    async fn connect(&mut self) {
        self.stop_task();
        self.sink.lock().await.take();

        // events of the previous connection are stale now
        while self.event_rx.try_recv().is_ok() {}

        self.task = Some(tokio::spawn(Self::run(
            self.url.clone(),
            self.compress,
            self.sink.clone(),
            self.event_tx.clone(),
        )));
    }

    async fn disconnect(&mut self) {
        self.stop_task();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            log::debug!("Closing push channel");
            if let Err(err) = sink.close().await {
                log::debug!("Close websocket failed: {}", err);
            }
        }
    }

    async fn emit(&mut self, name: &str, payload: Value) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().context(transport_error::NotConnected)?;

        log::trace!("Emit {} event", name);

        sink.send(Envelope::new(name, payload))
            .await
            .context(transport_error::Send { name })
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    #[test]
    fn test_new_validates_url() {
        assert!(matches!(
            WsChannel::new("http://127.0.0.1:5000/ws", false).unwrap_err(),
            TransportError::InvalidSchema { .. }
        ));
        assert!(matches!(
            WsChannel::new("::", false).unwrap_err(),
            TransportError::InvalidURL { .. }
        ));
        assert!(WsChannel::new("ws://127.0.0.1:5000/ws", false).is_ok());
    }

    #[tokio::test]
    async fn test_emit_not_connected() {
        let mut channel = WsChannel::new("ws://127.0.0.1:5000/ws", false).unwrap();

        let err = channel
            .emit("request_feed_update", Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_refused_fires_error_then_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut channel = WsChannel::new(&format!("ws://{}/ws", addr), false).unwrap();
        channel.connect().await;

        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::ConnectError(TransportError::Connect { .. }))
        ));
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Disconnected)
        ));
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_returns_before_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // accept but never answer the handshake
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut channel = WsChannel::new(&format!("ws://{}/", addr), false).unwrap();

        tokio::time::timeout(Duration::from_millis(500), channel.connect())
            .await
            .expect("connect should only start the dial");

        assert!(
            tokio::time::timeout(Duration::from_millis(200), channel.next_event())
                .await
                .is_err()
        );
        assert!(!channel.is_connected().await);

        tokio::time::timeout(Duration::from_millis(500), channel.disconnect())
            .await
            .unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn test_receive_compressed_binary_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = websocket::accept_async(socket).await.unwrap();

            let raw = json!({
                "event": "new_indicator",
                "data": { "indicator": { "type": "ip", "value": "10.0.0.1" } },
            })
            .to_string();
            let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_bytes(), 6);

            ws.send(Message::Ping(vec![1])).await.unwrap();
            ws.send(Message::Binary(compressed)).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut channel = WsChannel::new(&format!("ws://{}/", addr), true).unwrap();
        channel.connect().await;

        assert!(matches!(channel.next_event().await, Some(ChannelEvent::Connected)));

        match channel.next_event().await {
            Some(ChannelEvent::Message { name, payload }) => {
                assert_eq!(name, "new_indicator");
                assert_eq!(payload["indicator"]["value"], "10.0.0.1");
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Disconnected)
        ));
        assert!(!channel.is_connected().await);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_emit_and_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = websocket::accept_async(socket).await.unwrap();

            ws.send(Message::Text(
                json!({ "event": "feed_update", "data": { "data": { "sources": [] } } })
                    .to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text("not json".to_string())).await.unwrap();

            let request = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => break text,
                    _ => continue,
                }
            };

            ws.close(None).await.unwrap();
            request
        });

        let mut channel = WsChannel::new(&format!("ws://{}/", addr), false).unwrap();
        channel.connect().await;

        assert!(matches!(channel.next_event().await, Some(ChannelEvent::Connected)));

        match channel.next_event().await {
            Some(ChannelEvent::Message { name, payload }) => {
                assert_eq!(name, "feed_update");
                assert_eq!(payload, json!({ "data": { "sources": [] } }));
            }
            other => panic!("unexpected event {:?}", other),
        }

        channel
            .emit("request_report_update", Value::Null)
            .await
            .unwrap();

        // undecodable frame is skipped, next event is the close
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Disconnected)
        ));

        let request: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request, json!({ "event": "request_report_update", "data": null }));
    }
}
