use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use relay_control::{CommandRouter, HttpRelayDevice};
use scene_control::ObsClient;
use serde::{Deserialize, Serialize};
use server_api::{
    credentials::UserDirectory, list_scenes, preview, relay_command, relay_status, scene_status,
    search_songs, switch_scene, ApiContext,
};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ActionResponse, SceneStatusResponse, SongPayload},
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod pages;

use auth::{cleared_session_cookie, cookie_value, require_session, session_cookie, SessionKeys};
use config::{load_settings, prepare_database_url};

const MAX_FORM_BYTES: usize = 16 * 1024;

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) users: UserDirectory,
    pub(crate) sessions: SessionKeys,
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct SearchForm {
    #[serde(default)]
    search_term: String,
}

#[derive(Debug, Deserialize)]
struct SceneForm {
    scene_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayForm {
    relay_id: Option<String>,
    state: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let layout = Arc::new(settings.relay_layout().context("invalid relay layout")?);
    let device = HttpRelayDevice::new(&settings.relay_api_base_url, settings.relay_timeout())?;
    let relays = CommandRouter::new(Arc::new(device), layout)
        .with_call_timeout(settings.relay_timeout());
    let scenes = Arc::new(ObsClient::new(settings.obs_config()));

    let state = AppState {
        api: ApiContext {
            storage,
            relays,
            scenes,
        },
        users: settings.user_directory()?,
        sessions: SessionKeys::new(&settings.session_secret(), settings.session_ttl_seconds),
    };
    let app = build_router(Arc::new(state), Path::new(&settings.static_dir));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(
        %addr,
        relay_api = %settings.relay_api_base_url,
        obs = %settings.obs_config().url(),
        "control panel listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let protected = Router::new()
        .route("/", get(index_page))
        .route("/hinario", get(hymnal_page))
        .route("/api/search_songs", post(http_search_songs))
        .route("/api/obs/switch_scene", post(http_switch_scene))
        .route("/api/obs/scenes", get(http_obs_scenes))
        .route("/api/obs/preview", get(http_obs_preview))
        .route("/api/obs/status", get(http_obs_status))
        .route("/api/relay/control", post(http_relay_control))
        .route("/api/relay/initial_status", get(http_relay_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .merge(protected)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(RequestBodyLimitLayer::new(MAX_FORM_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match state.api.storage.health_check().await {
        Ok(()) => "ok".into_response(),
        Err(err) => {
            error!("health check failed: {err:#}");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
        }
    }
}

async fn login_page(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let signed_in = cookie_value(&headers, auth::SESSION_COOKIE)
        .and_then(|token| state.sessions.verify(token))
        .is_some();
    if signed_in {
        return Redirect::to("/").into_response();
    }
    Html(pages::login(query.error.is_some())).into_response()
}

async fn login(State(state): State<Arc<AppState>>, Form(form): Form<LoginForm>) -> Response {
    let username = form.username.trim().to_string();
    let verifier = state.clone();
    let candidate = username.clone();
    // PBKDF2 runs on the blocking pool.
    let verified = tokio::task::spawn_blocking(move || {
        verifier.users.verify(&candidate, &form.password)
    })
    .await
    .unwrap_or(false);

    if !verified {
        warn!(%username, "login rejected");
        return Redirect::to("/login?error=1").into_response();
    }

    match state.sessions.issue(&username) {
        Ok(token) => {
            info!(%username, "operator signed in");
            (
                [(
                    header::SET_COOKIE,
                    session_cookie(&token, state.sessions.ttl_seconds()),
                )],
                Redirect::to("/"),
            )
                .into_response()
        }
        Err(err) => {
            error!(%err, "failed to issue session token");
            (StatusCode::INTERNAL_SERVER_ERROR, "Erro interno").into_response()
        }
    }
}

async fn logout() -> Response {
    (
        [(header::SET_COOKIE, cleared_session_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

async fn index_page(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(pages::index(state.api.relays.layout()))
}

async fn hymnal_page() -> Html<&'static str> {
    Html(pages::HYMNAL_PAGE)
}

async fn http_search_songs(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SearchForm>,
) -> Result<Json<Vec<SongPayload>>, (StatusCode, Json<ApiError>)> {
    let songs = search_songs(&state.api, &form.search_term)
        .await
        .map_err(|e| (status_for(e.code), Json(e)))?;
    Ok(Json(songs))
}

async fn http_switch_scene(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SceneForm>,
) -> Response {
    // The switch task is detached; its outcome is only logged.
    legacy_json(switch_scene(&state.api, form.scene_name.as_deref()).map(|(response, _)| response))
}

async fn http_obs_scenes(State(state): State<Arc<AppState>>) -> Response {
    legacy_json(list_scenes(&state.api).await)
}

async fn http_obs_preview(State(state): State<Arc<AppState>>) -> Response {
    legacy_json(preview(&state.api).await)
}

async fn http_obs_status(State(state): State<Arc<AppState>>) -> Json<SceneStatusResponse> {
    Json(scene_status(&state.api).await)
}

async fn http_relay_control(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RelayForm>,
) -> Response {
    let outcome = relay_command(
        &state.api,
        form.relay_id.as_deref(),
        form.state.as_deref(),
    )
    .await;
    match outcome {
        Ok(outcome) if outcome.all_success => {
            Json(ActionResponse::ok(outcome.message)).into_response()
        }
        Ok(outcome) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ActionResponse::failed(outcome.message)),
        )
            .into_response(),
        Err(err) => legacy_json::<ActionResponse>(Err(err)),
    }
}

async fn http_relay_status(State(state): State<Arc<AppState>>) -> Response {
    legacy_json(relay_status(&state.api).await)
}

/// Panel endpoints answer errors as `{success: false, message}`.
fn legacy_json<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => (
            status_for(err.code),
            Json(ActionResponse::failed(err.message)),
        )
            .into_response(),
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Upstream | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
