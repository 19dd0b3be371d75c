use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{RelayChannel, RelayState, Song, SongId};

/// `{success, message}` body shared by the action endpoints and every JSON
/// error the panel returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongPayload {
    pub id: SongId,
    pub title: String,
    pub content: String,
    pub categories: Option<String>,
}

impl From<Song> for SongPayload {
    fn from(song: Song) -> Self {
        Self {
            id: song.id,
            title: song.title,
            content: song.content,
            categories: song.categories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneListResponse {
    pub success: bool,
    pub scenes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub success: bool,
    #[serde(rename = "imageData")]
    pub image_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneConnectionStatus {
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStatusResponse {
    pub status: SceneConnectionStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatusResponse {
    pub success: bool,
    pub status: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCommandResult {
    pub channel: RelayChannel,
    pub requested_state: RelayState,
    pub success: bool,
    pub message: String,
}

/// Aggregated result of one relay command, possibly fanned out to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCommandOutcome {
    pub all_success: bool,
    pub results: Vec<ChannelCommandResult>,
    pub message: String,
}
