// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exposing the local callback listener to the public internet.

use crate::errors::TunnelError;
use serde::Deserialize;
use std::{future::Future, time::Duration};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Maps a local listening port to a publicly reachable base URL.
pub trait TunnelProvider: Send {
    /// Opens the tunnel and returns the public base URL (no trailing slash).
    fn open_tunnel(
        &mut self,
        local_port: u16,
    ) -> impl Future<Output = Result<String, TunnelError>> + Send;

    /// Tears the tunnel down. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// A "tunnel" for environments that already have public ingress to the
/// listener: hands out a preconfigured base URL. Also what the tests use.
#[derive(Clone, Debug)]
pub struct StaticTunnel {
    base_url: String,
}

impl StaticTunnel {
    /// Creates a static tunnel serving `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

impl TunnelProvider for StaticTunnel {
    async fn open_tunnel(&mut self, _local_port: u16) -> Result<String, TunnelError> {
        Ok(self.base_url.clone())
    }

    async fn close(&mut self) {}
}

/// How long to wait for ngrok to report a public URL.
const NGROK_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Poll interval against the ngrok inspection API while starting up.
const NGROK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tunnels through a locally spawned `ngrok http` process, discovering the
/// public URL via ngrok's local inspection API.
#[derive(Debug, Default)]
pub struct NgrokTunnel {
    child: Option<Child>,
}

#[derive(Debug, Deserialize)]
struct NgrokTunnelList {
    tunnels: Vec<NgrokTunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct NgrokTunnelInfo {
    public_url: String,
}

impl NgrokTunnel {
    const API_URL: &'static str = "http://127.0.0.1:4040/api/tunnels";

    /// Creates an ngrok tunnel that has not been opened yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn query_public_url(agent: &ureq::Agent) -> Result<Option<String>, TunnelError> {
        let mut response = match agent.get(Self::API_URL).call() {
            Ok(response) => response,
            // The inspection API isn't up yet; treat as "no URL yet".
            Err(ureq::Error::Io(err)) => {
                debug!(%err, "ngrok API not reachable yet");
                return Ok(None);
            }
            Err(err) => {
                return Err(TunnelError::Api {
                    api_url: Self::API_URL.to_owned(),
                    err: Box::new(err),
                });
            }
        };
        let list: NgrokTunnelList = response.body_mut().read_json().map_err(|err| {
            TunnelError::Api {
                api_url: Self::API_URL.to_owned(),
                err: Box::new(err),
            }
        })?;
        Ok(list
            .tunnels
            .into_iter()
            .map(|tunnel| tunnel.public_url)
            .find(|url| url.starts_with("https://")))
    }
}

impl TunnelProvider for NgrokTunnel {
    async fn open_tunnel(&mut self, local_port: u16) -> Result<String, TunnelError> {
        let child = Command::new("ngrok")
            .args(["http", &local_port.to_string(), "--log", "stdout"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TunnelError::Spawn {
                command: format!("ngrok http {local_port}"),
                err,
            })?;
        self.child = Some(child);

        let deadline = tokio::time::Instant::now() + NGROK_STARTUP_TIMEOUT;
        let agent = ureq::Agent::new_with_defaults();
        while tokio::time::Instant::now() < deadline {
            let agent = agent.clone();
            let found = tokio::task::spawn_blocking(move || Self::query_public_url(&agent))
                .await
                .map_err(|err| TunnelError::Spawn {
                    command: "ngrok api query".to_owned(),
                    err: std::io::Error::other(err),
                })??;
            if let Some(url) = found {
                debug!(%url, local_port, "ngrok tunnel established");
                return Ok(url);
            }
            tokio::time::sleep(NGROK_POLL_INTERVAL).await;
        }

        self.close().await;
        Err(TunnelError::NoPublicUrl {
            timeout: NGROK_STARTUP_TIMEOUT,
        })
    }

    async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                warn!(%err, "failed to kill ngrok process");
                return;
            }
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_tunnel_strips_trailing_slash() {
        let mut tunnel = StaticTunnel::new("https://example.test/");
        let url = tunnel.open_tunnel(8000).await.unwrap();
        assert_eq!(url, "https://example.test");
        tunnel.close().await;
    }

    #[test]
    fn ngrok_api_response_parses() {
        let raw = r#"{"tunnels":[
            {"public_url":"tcp://0.tcp.ngrok.io:12345","proto":"tcp"},
            {"public_url":"https://abcd1234.ngrok.app","proto":"https"}
        ],"uri":"/api/tunnels"}"#;
        let list: NgrokTunnelList = serde_json::from_str(raw).unwrap();
        let https = list
            .tunnels
            .into_iter()
            .map(|t| t.public_url)
            .find(|url| url.starts_with("https://"));
        assert_eq!(https.as_deref(), Some("https://abcd1234.ngrok.app"));
    }
}
