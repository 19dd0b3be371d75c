//! Client side of the OBS Studio WebSocket control protocol (v5).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;
pub mod protocol;

pub use client::{ObsClient, ObsConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneControlError {
    #[error("tempo esgotado aguardando o OBS")]
    Timeout,
    #[error("falha ao conectar ao OBS: {0}")]
    Connect(String),
    #[error("falha de autenticação no OBS: {0}")]
    Auth(String),
    #[error("conexão com o OBS encerrada: {0}")]
    Closed(String),
    #[error("erro de transporte com o OBS: {0}")]
    Transport(String),
    #[error("resposta inválida do OBS: {0}")]
    Protocol(String),
    #[error("Falha na requisição OBS ({request_type}): {message}")]
    Request {
        request_type: String,
        message: String,
    },
}

impl SceneControlError {
    /// True when the socket itself is suspect and the session must be dropped.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SceneControlError::Timeout
                | SceneControlError::Connect(_)
                | SceneControlError::Closed(_)
                | SceneControlError::Transport(_)
                | SceneControlError::Protocol(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    pub source_name: String,
    pub image_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_compression_quality: Option<i32>,
}

impl ScreenshotRequest {
    /// Still used by the control panel preview: 640px wide JPEG at quality 70.
    pub fn preview(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            image_format: "jpeg".into(),
            image_width: Some(640),
            image_compression_quality: Some(70),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsVersion {
    #[serde(default)]
    pub obs_version: String,
    #[serde(default)]
    pub obs_web_socket_version: String,
    #[serde(default)]
    pub rpc_version: u32,
}

#[async_trait]
pub trait SceneControl: Send + Sync {
    async fn set_current_program_scene(&self, scene_name: &str) -> Result<(), SceneControlError>;
    async fn scene_names(&self) -> Result<Vec<String>, SceneControlError>;
    async fn current_program_scene(&self) -> Result<String, SceneControlError>;
    /// Returns the image as a `data:` URI.
    async fn source_screenshot(
        &self,
        request: &ScreenshotRequest,
    ) -> Result<String, SceneControlError>;
    async fn version(&self) -> Result<ObsVersion, SceneControlError>;
}
