use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use snafu::prelude::*;

use super::error::variant::*;
use super::types::*;
use super::Result;
use crate::event::UpdateKind;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Default timeout of one api request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Dashboard HTTP API Client
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
}

impl Client {
    /// create a new api client for server at `base_url`, like `http://127.0.0.1:5000`
    pub fn new<S: AsRef<str> + ?Sized>(base_url: &S) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// create a new api client whose requests fail after `timeout`
    pub fn with_timeout<S: AsRef<str> + ?Sized>(base_url: &S, timeout: Duration) -> Result<Self> {
        let base_url = base_url.as_ref();

        let parsed =
            url::Url::parse(base_url).with_context(|_| InvalidBaseURL { url: base_url })?;

        ensure!(
            parsed.scheme() == "http" || parsed.scheme() == "https",
            InvalidSchema {
                url: base_url,
                schema: parsed.scheme(),
            }
        );

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context(ClientCreateFailed)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// server base url, without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<R, P>(&self, path: &P) -> Result<R>
    where
        P: AsRef<str> + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path.as_ref());

        log::trace!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|_| RequestFailed {
                method: Method::POST,
                url: &url,
            })?;

        ensure!(
            resp.status() == StatusCode::OK,
            HTTPStatusNotOK {
                method: Method::POST,
                url: &url,
                status_code: resp.status()
            }
        );

        let body = resp.bytes().await.with_context(|_| RequestFailed {
            method: Method::POST,
            url: &url,
        })?;

        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })
    }

    /// Call refresh endpoint of `kind`, server drops its cache and returns fresh data
    pub async fn refresh(&self, kind: UpdateKind) -> Result<Value> {
        let path = kind.refresh_path();
        let result: RefreshResponse = self.post(path).await?;

        ensure!(
            result.success,
            NotSuccess {
                url: format!("{}{}", self.base_url, path),
                message: result.error.unwrap_or_default(),
            }
        );

        Ok(result.data)
    }

    /// Call /api/feeds/refresh
    pub async fn refresh_feeds(&self) -> Result<Value> {
        self.refresh(UpdateKind::Feed).await
    }

    /// Call /api/reports/refresh
    pub async fn refresh_reports(&self) -> Result<Value> {
        self.refresh(UpdateKind::Report).await
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::super::Error;
    use super::*;

    /// Answer exactly one http request with given status line and body, returning request head
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            String::from_utf8_lossy(&head).into_owned()
        });

        (format!("http://{}/", addr), handle)
    }

    #[tokio::test]
    async fn test_refresh_feeds_returns_data() {
        let body = json!({ "success": true, "data": { "recent_indicators": [] } }).to_string();
        let (base, server) = serve_once("200 OK", body).await;

        let client = Client::new(&base).unwrap();
        let data = client.refresh_feeds().await.unwrap();

        assert_eq!(data, json!({ "recent_indicators": [] }));

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /api/feeds/refresh "), "{}", head);
    }

    #[tokio::test]
    async fn test_refresh_not_success() {
        let body = json!({ "success": false, "error": "feed source down" }).to_string();
        let (base, server) = serve_once("200 OK", body).await;

        let client = Client::new(&base).unwrap();
        let err = client.refresh_reports().await.unwrap_err();

        match err {
            Error::NotSuccess { url, message } => {
                assert!(url.ends_with("/api/reports/refresh"));
                assert_eq!(message, "feed source down");
            }
            other => panic!("unexpected error {:?}", other),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_http_status_not_ok() {
        let (base, server) = serve_once("500 Internal Server Error", "{}".to_string()).await;

        let client = Client::new(&base).unwrap();
        let err = client.refresh(UpdateKind::Feed).await.unwrap_err();

        assert!(matches!(
            err,
            Error::HTTPStatusNotOK { status_code, .. } if status_code == StatusCode::INTERNAL_SERVER_ERROR
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // read the request but never answer
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client =
            Client::with_timeout(&format!("http://{}", addr), Duration::from_millis(200)).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), client.refresh_feeds())
            .await
            .expect("request should time out by itself")
            .unwrap_err();

        match err {
            Error::RequestFailed { source, .. } => assert!(source.is_timeout(), "{}", source),
            other => panic!("unexpected error {:?}", other),
        }

        server.abort();
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Client::new("not a url").unwrap_err(),
            Error::InvalidBaseURL { .. }
        ));
        assert!(matches!(
            Client::new("ws://127.0.0.1:5000").unwrap_err(),
            Error::InvalidSchema { .. }
        ));
        assert_eq!(
            Client::new("http://127.0.0.1:5000/").unwrap().base_url(),
            "http://127.0.0.1:5000"
        );
    }
}
