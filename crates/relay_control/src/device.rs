use std::{collections::BTreeMap, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::domain::{RelayChannel, RelayState};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayDeviceError {
    #[error("relay api timed out")]
    Timeout,
    #[error("relay api unreachable: {0}")]
    Transport(String),
    /// The device answered but declined the command.
    #[error("relay api rejected the command: {}", .0.as_deref().unwrap_or("no message"))]
    Rejected(Option<String>),
    #[error("unexpected relay api failure: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayAck {
    pub message: Option<String>,
}

/// Boundary to the service that owns the relay hardware. Electrical polarity
/// (logical ON driving the pin low) is the device's concern, not the caller's.
#[async_trait]
pub trait RelayDevice: Send + Sync {
    async fn set_state(
        &self,
        channel: RelayChannel,
        state: RelayState,
    ) -> Result<RelayAck, RelayDeviceError>;

    /// Channel number (as a string key) to `"on"` / `"off"`.
    async fn status(&self) -> Result<BTreeMap<String, String>, RelayDeviceError>;
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: BTreeMap<String, String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpRelayDevice {
    http: Client,
    base_url: Url,
}

impl HttpRelayDevice {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("invalid relay api base url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("relay api base url '{base_url}' cannot be a base"));
        }
        // `Url::join` drops the last path segment unless it ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay http client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, RelayDeviceError> {
        self.base_url
            .join(path)
            .map_err(|e| RelayDeviceError::Unexpected(format!("invalid relay api url: {e}")))
    }
}

#[async_trait]
impl RelayDevice for HttpRelayDevice {
    async fn set_state(
        &self,
        channel: RelayChannel,
        state: RelayState,
    ) -> Result<RelayAck, RelayDeviceError> {
        let url = self.endpoint(&format!("relay/{}/{}", channel.0, state.as_str()))?;
        let response = self.http.post(url).send().await.map_err(classify)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        match serde_json::from_slice::<CommandReply>(&body) {
            Ok(reply) if !reply.success => Err(RelayDeviceError::Rejected(reply.message)),
            _ if !status.is_success() => Err(http_status_error(status)),
            Ok(reply) => Ok(RelayAck {
                message: reply.message,
            }),
            Err(err) => Err(RelayDeviceError::Unexpected(format!(
                "invalid relay api response: {err}"
            ))),
        }
    }

    async fn status(&self) -> Result<BTreeMap<String, String>, RelayDeviceError> {
        let url = self.endpoint("relay/status")?;
        let response = self.http.get(url).send().await.map_err(classify)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        match serde_json::from_slice::<StatusReply>(&body) {
            Ok(reply) if !reply.success => Err(RelayDeviceError::Rejected(reply.message)),
            _ if !status.is_success() => Err(http_status_error(status)),
            Ok(reply) => Ok(reply.status),
            Err(err) => Err(RelayDeviceError::Unexpected(format!(
                "invalid relay api response: {err}"
            ))),
        }
    }
}

fn classify(err: reqwest::Error) -> RelayDeviceError {
    if err.is_timeout() {
        RelayDeviceError::Timeout
    } else {
        RelayDeviceError::Transport(err.to_string())
    }
}

fn http_status_error(status: StatusCode) -> RelayDeviceError {
    RelayDeviceError::Transport(format!("HTTP {status}"))
}

#[cfg(test)]
#[path = "tests/device_tests.rs"]
mod tests;
