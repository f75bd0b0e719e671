// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The inbound callback listener.
//!
//! One listener serves the whole process. The remote executions POST one
//! progress notification at a time; each request carries the correlation key
//! in a header and a JSON payload in the body. The listener's only job is to
//! hand `(key, payload)` to the [`CallbackRegistry`] and answer an empty 200
//! regardless of whether the key matched a live waiter.
//!
//! The protocol is a single POST with `Content-Length` and a handful of
//! headers, so the listener speaks just enough HTTP/1.1 itself rather than
//! carrying a server framework for it. Parse failures of any kind drop the
//! notification; they never propagate past this module.

use crate::{
    correlation::{CORRELATION_HEADER, CorrelationKey},
    errors::ListenerError,
    registry::{CallbackPayload, CallbackRegistry},
};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Notifications are tiny; anything this large is garbage.
const MAX_BODY_BYTES: u64 = 1 << 20;

const EMPTY_OK: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// The single shared inbound listening endpoint.
///
/// Bound once per process; accepts connections until dropped.
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl CallbackListener {
    /// Binds to `port` on all interfaces (0 for an ephemeral port) and
    /// starts routing callbacks into `registry`.
    pub async fn bind(port: u16, registry: CallbackRegistry) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|err| ListenerError::Bind { port, err })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| ListenerError::Bind { port, err })?;
        let accept_task = tokio::spawn(accept_loop(listener, registry));
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The local port, for handing to the tunnel provider.
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, registry: CallbackRegistry) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, &registry).await {
                        debug!(%peer, %err, "error serving callback connection");
                    }
                });
            }
            Err(err) => {
                // Transient accept errors (e.g. EMFILE) shouldn't kill the
                // listener.
                warn!(%err, "failed to accept callback connection");
            }
        }
    }
}

/// Serves one POSTed notification and always answers an empty 200.
async fn serve_connection(
    stream: TcpStream,
    registry: &CallbackRegistry,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut correlation: Option<String> = None;
    let mut content_length: u64 = 0;
    let mut header_line = String::new();
    loop {
        header_line.clear();
        reader.read_line(&mut header_line).await?;
        let header = header_line.trim_end();
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == CORRELATION_HEADER {
            correlation = Some(value.to_owned());
        } else if name == "content-length" {
            content_length = value.parse().unwrap_or(0);
        }
    }

    if content_length > MAX_BODY_BYTES {
        debug!(content_length, "oversized callback body, dropping");
        write_half.write_all(EMPTY_OK).await?;
        return write_half.shutdown().await;
    }

    let mut body = vec![0; content_length as usize];
    reader.read_exact(&mut body).await?;

    // Respond before routing: the remote side only needs the ack, and the
    // response must be an empty 200 whether or not the key matches.
    write_half.write_all(EMPTY_OK).await?;

    match (
        correlation,
        serde_json::from_slice::<CallbackPayload>(&body),
    ) {
        (Some(raw_key), Ok(payload)) => {
            let key = CorrelationKey::from_wire(&raw_key);
            registry.dispatch_notification(&key, payload);
        }
        (None, _) => {
            debug!("callback without correlation header, dropping");
        }
        (Some(raw_key), Err(err)) => {
            debug!(key = %raw_key, %err, "malformed callback body, dropping");
        }
    }

    write_half.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Browser, TestCombination};
    use crate::registry::{CallbackStatus, ResultRow};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn test_key() -> CorrelationKey {
        let combination = TestCombination {
            workflow_id: "nvda.yml".to_owned(),
            browser: Browser::Firefox,
            test_plan: "tests/menu".to_owned(),
        };
        CorrelationKey::new(&combination, 0)
    }

    /// POSTs `body` with the given correlation header value and returns the
    /// raw response.
    async fn post_callback(addr: SocketAddr, key: Option<&str>, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut request = format!("POST /callback HTTP/1.1\r\nhost: {addr}\r\n");
        if let Some(key) = key {
            request.push_str(&format!("{CORRELATION_HEADER}: {key}\r\n"));
        }
        request.push_str(&format!("content-length: {}\r\n\r\n{body}", body.len()));
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn routes_callback_to_waiter() {
        let registry = CallbackRegistry::new();
        let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();
        let run = registry
            .register(test_key(), Duration::from_millis(50))
            .unwrap();

        let response = post_callback(
            listener.local_addr(),
            Some(test_key().as_str()),
            r#"{"status":"COMPLETED","rowId":0,"responses":["menu expanded"]}"#,
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

        let result = run.settled().await;
        assert_eq!(
            result.rows,
            vec![ResultRow {
                row_id: Some(0),
                responses: vec!["menu expanded".to_owned()],
            }],
        );
    }

    #[tokio::test]
    async fn malformed_body_gets_200_and_is_dropped() {
        let registry = CallbackRegistry::new();
        let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();
        let _run = registry
            .register(test_key(), Duration::from_secs(30))
            .unwrap();

        let response = post_callback(
            listener.local_addr(),
            Some(test_key().as_str()),
            "this is not json",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        // The waiter is untouched: still pending, still registered.
        assert_eq!(registry.pending_runs(), 1);
    }

    #[tokio::test]
    async fn missing_correlation_header_gets_200() {
        let registry = CallbackRegistry::new();
        let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();

        let response = post_callback(
            listener.local_addr(),
            None,
            r#"{"status":"RUNNING"}"#,
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    }

    #[tokio::test]
    async fn unknown_key_gets_200() {
        let registry = CallbackRegistry::new();
        let listener = CallbackListener::bind(0, registry).await.unwrap();

        let response = post_callback(
            listener.local_addr(),
            Some("never-registered:chrome:p:0"),
            r#"{"status":"COMPLETED","responses":["x"]}"#,
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    }

    #[test]
    fn status_round_trips_through_wire_form() {
        let status: CallbackStatus = serde_json::from_str(r#""COMPLETED""#).unwrap();
        assert_eq!(status, CallbackStatus::Completed);
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""COMPLETED""#);
    }
}
