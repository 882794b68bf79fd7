// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP/HTTPS transport backed by `reqwest`.
//!
//! Each [`Transport::open`] spawns a task on the current tokio runtime that
//! issues a streaming GET and forwards header lines and body chunks over a
//! bounded channel. The bound is what applies backpressure to the socket
//! while the transfer adapter holds its reads.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use portkit_core::{PortKitError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::transport::{Transport, TransportPoll};

const CHANNEL_CAPACITY: usize = 64;

fn shared_http_client() -> Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<std::result::Result<reqwest::Client, reqwest::Error>> = OnceLock::new();
    CLIENT
        .get_or_init(|| reqwest::Client::builder().connect_timeout(Duration::from_secs(5)).build())
        .as_ref()
        .map_err(|e| PortKitError::Network(format!("Failed to initialize HTTP client: {e}")))
}

#[derive(Default)]
pub struct HttpTransport {
    rx: Option<mpsc::Receiver<TransportPoll>>,
    cancel: Option<CancellationToken>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch(
        client: &reqwest::Client,
        url: Url,
        tx: &mpsc::Sender<TransportPoll>,
    ) -> std::result::Result<(), String> {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        for (name, value) in response.headers() {
            let mut line = Vec::with_capacity(name.as_str().len() + value.len() + 2);
            line.extend_from_slice(name.as_str().as_bytes());
            line.extend_from_slice(b": ");
            line.extend_from_slice(value.as_bytes());
            if tx.send(TransportPoll::Header(Bytes::from(line))).await.is_err() {
                return Ok(());
            }
        }

        let mut stream = response.bytes_stream();
        let mut total_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Failed to read chunk: {e}"))?;
            total_bytes += chunk.len() as u64;
            if tx.send(TransportPoll::Data(chunk)).await.is_err() {
                return Ok(());
            }
        }
        tracing::debug!(%url, total_bytes, "HTTP body complete");
        let _ = tx.send(TransportPoll::Finished).await;
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn open(&mut self, url: &Url) -> Result<()> {
        self.close();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PortKitError::ContentUri(format!("unsupported scheme '{}'", url.scheme())));
        }
        let client = shared_http_client()?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| {
                PortKitError::Network(format!("No async runtime for HTTP transfer: {e}"))
            })?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let child = token.clone();
        let url = url.clone();
        tracing::info!(%url, "Starting streaming GET request");
        handle.spawn(async move {
            tokio::select! {
                () = child.cancelled() => {},
                result = Self::fetch(client, url, &tx) => {
                    if let Err(reason) = result {
                        let _ = tx.send(TransportPoll::Lost(reason)).await;
                    }
                },
            }
        });
        self.rx = Some(rx);
        self.cancel = Some(token);
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll {
        let Some(rx) = self.rx.as_mut() else {
            return TransportPoll::Pending;
        };
        match rx.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Empty) => TransportPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                TransportPoll::Lost("transfer task ended".to_string())
            },
        }
    }

    fn close(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.rx = None;
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, StatusCode},
        response::IntoResponse,
        routing::get,
        Router,
    };

    const BODY: &[u8] = b"ID3 this is not really an mp3 stream";

    async fn start_mock_server() -> Option<String> {
        async fn handler() -> impl IntoResponse {
            (StatusCode::OK, [(header::CONTENT_TYPE, "audio/mpeg")], BODY)
        }

        let app = Router::new().route("/track.mp3", get(handler));
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
            Err(e) => panic!("Failed to bind test HTTP listener: {e}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Some(format!("http://{addr}/track.mp3"))
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let mut transport = HttpTransport::new();
        let url = Url::parse("ftp://example.com/a.mp3").unwrap();
        assert!(matches!(transport.open(&url), Err(PortKitError::ContentUri(_))));
    }

    #[tokio::test]
    async fn test_streams_headers_then_body() {
        let Some(url) = start_mock_server().await else {
            tracing::warn!("Skipping test_streams_headers_then_body: local TCP bind not permitted");
            return;
        };
        let mut transport = HttpTransport::new();
        transport.open(&Url::parse(&url).unwrap()).unwrap();

        let mut headers = Vec::new();
        let mut body = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match transport.poll() {
                TransportPoll::Header(line) => {
                    headers.push(String::from_utf8_lossy(&line).into_owned());
                },
                TransportPoll::Data(chunk) => body.extend_from_slice(&chunk),
                TransportPoll::Finished => break,
                TransportPoll::Lost(reason) => panic!("connection lost: {reason}"),
                TransportPoll::Pending => {
                    assert!(tokio::time::Instant::now() < deadline, "timed out");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                },
            }
        }
        assert!(headers.iter().any(|h| h == "content-type: audio/mpeg"));
        assert_eq!(body, BODY);
    }
}
