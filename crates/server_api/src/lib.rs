pub mod credentials;

use std::sync::Arc;

use relay_control::{CommandRouter, RelayDeviceError};
use scene_control::{SceneControl, SceneControlError, ScreenshotRequest};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        ActionResponse, GroupCommandOutcome, PreviewResponse, RelayStatusResponse,
        SceneConnectionStatus, SceneListResponse, SceneStatusResponse, SongPayload,
    },
};
use storage::{display_lyrics, Storage, DEFAULT_SEARCH_LIMIT};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub relays: CommandRouter,
    pub scenes: Arc<dyn SceneControl>,
}

/// Blank terms return no rows instead of the whole table.
pub async fn search_songs(ctx: &ApiContext, search_term: &str) -> Result<Vec<SongPayload>, ApiError> {
    let term = search_term.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    let songs = ctx
        .storage
        .search_songs(term, DEFAULT_SEARCH_LIMIT)
        .await
        .map_err(internal)?;
    Ok(songs
        .into_iter()
        .map(|song| {
            let mut payload = SongPayload::from(song);
            payload.content = display_lyrics(&payload.content);
            payload
        })
        .collect())
}

/// Queues the switch and answers immediately; the outcome is only logged.
pub fn switch_scene(
    ctx: &ApiContext,
    scene_name: Option<&str>,
) -> Result<(ActionResponse, JoinHandle<()>), ApiError> {
    let Some(scene_name) = scene_name.filter(|name| !name.is_empty()) else {
        return Err(ApiError::validation("Nome da cena não fornecido"));
    };

    let scenes = ctx.scenes.clone();
    let name = scene_name.to_string();
    let task = tokio::spawn(async move {
        match scenes.set_current_program_scene(&name).await {
            Ok(()) => info!(scene = %name, "scene switch applied"),
            Err(err) => error!(scene = %name, %err, "scene switch failed"),
        }
    });

    Ok((
        ActionResponse::ok(format!(
            "Comando enviado para alterar para a cena {scene_name}"
        )),
        task,
    ))
}

pub async fn list_scenes(ctx: &ApiContext) -> Result<SceneListResponse, ApiError> {
    match ctx.scenes.scene_names().await {
        Ok(scenes) => Ok(SceneListResponse {
            success: true,
            scenes,
        }),
        Err(err) => {
            error!(%err, "failed to list obs scenes");
            Err(ApiError::new(
                ErrorCode::Upstream,
                format!("Erro ao buscar cenas: {err}"),
            ))
        }
    }
}

pub async fn preview(ctx: &ApiContext) -> Result<PreviewResponse, ApiError> {
    let capture = async {
        let scene = ctx.scenes.current_program_scene().await?;
        let image = ctx
            .scenes
            .source_screenshot(&ScreenshotRequest::preview(scene))
            .await?;
        Ok::<_, SceneControlError>(image)
    };
    match capture.await {
        Ok(image_data) => Ok(PreviewResponse {
            success: true,
            image_data,
        }),
        Err(err) => {
            error!(%err, "failed to capture obs preview");
            Err(ApiError::new(
                ErrorCode::Upstream,
                format!("Erro ao obter preview: {err}"),
            ))
        }
    }
}

pub async fn scene_status(ctx: &ApiContext) -> SceneStatusResponse {
    match ctx.scenes.version().await {
        Ok(version) => {
            info!(obs_version = %version.obs_version, "obs reachable");
            SceneStatusResponse {
                status: SceneConnectionStatus::Connected,
                message: "Conectado ao OBS Studio".into(),
            }
        }
        Err(err) => {
            warn!(%err, "obs status check failed");
            SceneStatusResponse {
                status: SceneConnectionStatus::Error,
                message: format!("Não foi possível conectar ao OBS: {err}"),
            }
        }
    }
}

/// A partial failure is still `Ok`; callers read `all_success`.
pub async fn relay_command(
    ctx: &ApiContext,
    relay_id: Option<&str>,
    state: Option<&str>,
) -> Result<GroupCommandOutcome, ApiError> {
    ctx.relays
        .dispatch(relay_id.unwrap_or_default(), state.unwrap_or_default())
        .await
        .map_err(|err| ApiError::validation(err.to_string()))
}

pub async fn relay_status(ctx: &ApiContext) -> Result<RelayStatusResponse, ApiError> {
    match ctx.relays.status().await {
        Ok(status) => {
            info!(channels = status.len(), "relay status fetched");
            Ok(RelayStatusResponse {
                success: true,
                status,
            })
        }
        Err(err) => {
            let api_error = match &err {
                RelayDeviceError::Timeout => ApiError::new(
                    ErrorCode::Unavailable,
                    "Timeout ao obter status inicial dos relés da API.",
                ),
                RelayDeviceError::Transport(detail) => ApiError::new(
                    ErrorCode::Unavailable,
                    format!("Erro de conexão/requisição ao obter status inicial dos relés: {detail}"),
                ),
                RelayDeviceError::Rejected(message) => ApiError::new(
                    ErrorCode::Upstream,
                    format!(
                        "Erro inesperado ao obter status inicial dos relés: {}",
                        message
                            .as_deref()
                            .unwrap_or("Erro na API de status dos relés")
                    ),
                ),
                RelayDeviceError::Unexpected(detail) => ApiError::internal(format!(
                    "Erro inesperado ao obter status inicial dos relés: {detail}"
                )),
            };
            error!(%err, "failed to fetch relay status");
            Err(api_error)
        }
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("storage failure: {err:#}");
    ApiError::internal(err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
