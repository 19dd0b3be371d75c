use super::*;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request};
use relay_control::{RelayAck, RelayDevice, RelayDeviceError};
use scene_control::{ObsVersion, SceneControl, SceneControlError, ScreenshotRequest};
use server_api::credentials::hash_password_with_rounds;
use shared::domain::{RelayChannel, RelayLayout, RelayState};
use std::collections::BTreeMap;
use tower::ServiceExt;

struct FakeScenes {
    online: bool,
}

#[async_trait]
impl SceneControl for FakeScenes {
    async fn set_current_program_scene(&self, _scene_name: &str) -> Result<(), SceneControlError> {
        Ok(())
    }

    async fn scene_names(&self) -> Result<Vec<String>, SceneControlError> {
        if self.online {
            Ok(vec!["Louvor".into(), "Pregação".into()])
        } else {
            Err(SceneControlError::Timeout)
        }
    }

    async fn current_program_scene(&self) -> Result<String, SceneControlError> {
        Ok("Louvor".into())
    }

    async fn source_screenshot(
        &self,
        _request: &ScreenshotRequest,
    ) -> Result<String, SceneControlError> {
        Ok("data:image/jpeg;base64,AAAA".into())
    }

    async fn version(&self) -> Result<ObsVersion, SceneControlError> {
        if self.online {
            Ok(ObsVersion::default())
        } else {
            Err(SceneControlError::Connect("connection refused".into()))
        }
    }
}

struct FakeRelays {
    failing_channel: Option<u8>,
    status_times_out: bool,
}

#[async_trait]
impl RelayDevice for FakeRelays {
    async fn set_state(
        &self,
        channel: RelayChannel,
        _state: RelayState,
    ) -> Result<RelayAck, RelayDeviceError> {
        if self.failing_channel == Some(channel.0) {
            Err(RelayDeviceError::Rejected(Some(format!("Relé {channel} travado"))))
        } else {
            Ok(RelayAck::default())
        }
    }

    async fn status(&self) -> Result<BTreeMap<String, String>, RelayDeviceError> {
        if self.status_times_out {
            Err(RelayDeviceError::Timeout)
        } else {
            Ok((1..=6).map(|n| (n.to_string(), "on".to_string())).collect())
        }
    }
}

struct TestApp {
    router: Router,
    sessions: SessionKeys,
}

impl TestApp {
    async fn with(scenes: FakeScenes, relays: FakeRelays, static_dir: &Path) -> Self {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let sessions = SessionKeys::new("segredo-de-teste", 300);
        let users = UserDirectory::new()
            .with_user("admin", &hash_password_with_rounds("admin123", 1_000))
            .expect("users");
        let state = AppState {
            api: ApiContext {
                storage,
                relays: CommandRouter::new(Arc::new(relays), Arc::new(RelayLayout::default())),
                scenes: Arc::new(scenes),
            },
            users,
            sessions: sessions.clone(),
        };
        Self {
            router: build_router(Arc::new(state), static_dir),
            sessions,
        }
    }

    async fn new() -> Self {
        Self::with(
            FakeScenes { online: true },
            FakeRelays {
                failing_channel: None,
                status_times_out: false,
            },
            Path::new("./static"),
        )
        .await
    }

    fn cookie(&self) -> String {
        let token = self.sessions.issue("admin").expect("token");
        format!("{}={token}", auth::SESSION_COOKIE)
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("response")
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(
            Request::get(uri)
                .header(header::COOKIE, self.cookie())
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    async fn post_form(&self, uri: &str, form: &str) -> Response {
        self.send(
            Request::post(uri)
                .header(header::COOKIE, self.cookie())
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .expect("request"),
        )
        .await
    }
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn text_body(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = TestApp::new().await;
    let response = app
        .send(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "ok");
}

#[tokio::test]
async fn pages_redirect_to_login_without_a_session() {
    let app = TestApp::new().await;
    for uri in ["/", "/hinario"] {
        let response = app
            .send(Request::get(uri).body(Body::empty()).expect("request"))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(&response), "/login");
    }
}

#[tokio::test]
async fn api_rejects_missing_or_forged_sessions_with_json() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::get("/api/obs/status")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "unauthorized");

    let forged = SessionKeys::new("outro-segredo", 300)
        .issue("admin")
        .expect("token");
    let response = app
        .send(
            Request::get("/api/relay/initial_status")
                .header(header::COOKIE, format!("{}={forged}", auth::SESSION_COOKIE))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_valid_credentials_sets_session_cookie() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=admin&password=admin123"))
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("set-cookie")
        .to_string();
    assert!(cookie.contains("HttpOnly"));
    let token = cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, token)| token)
        .expect("token");

    let response = app
        .send(
            Request::get("/")
                .header(header::COOKIE, format!("{}={token}", auth::SESSION_COOKIE))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_with_wrong_password_redirects_with_error_flag() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=admin&password=errada"))
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?error=1");
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let page = app
        .send(
            Request::get("/login?error=1")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert!(text_body(page).await.contains("Usuário ou senha inválidos"));
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let app = TestApp::new().await;
    let response = app.get("/logout").await;
    assert_eq!(location(&response), "/login");
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn control_panel_renders_configured_relay_groups() {
    let app = TestApp::new().await;
    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = text_body(response).await;
    assert!(html.contains(r#"data-relay="frente" data-channels="1,2""#));
    assert!(html.contains(r#"data-relay="6""#));
    assert!(!html.contains("{{relay_controls}}"));
}

#[tokio::test]
async fn search_songs_returns_normalized_matches() {
    let app = TestApp::new().await;
    let songs = json_body(app.post_form("/api/search_songs", "search_term=ladr%C3%A3o").await).await;
    let songs = songs.as_array().expect("array");
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0]["title"], "O REI E O LADRÃO");
    assert!(songs[0]["content"]
        .as_str()
        .unwrap_or_default()
        .starts_with("MEUS OLHOS TÃO CANSADOS; E MARCADOS"));

    let empty = json_body(app.post_form("/api/search_songs", "search_term=").await).await;
    assert_eq!(empty, serde_json::json!([]));
}

#[tokio::test]
async fn switch_scene_validates_and_acknowledges() {
    let app = TestApp::new().await;
    let response = app.post_form("/api/obs/switch_scene", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "success": false, "message": "Nome da cena não fornecido" })
    );

    let response = app
        .post_form("/api/obs/switch_scene", "scene_name=Prega%C3%A7%C3%A3o")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "success": true,
            "message": "Comando enviado para alterar para a cena Pregação"
        })
    );
}

#[tokio::test]
async fn obs_routes_follow_the_panel_json_shapes() {
    let app = TestApp::new().await;
    assert_eq!(
        json_body(app.get("/api/obs/scenes").await).await,
        serde_json::json!({ "success": true, "scenes": ["Louvor", "Pregação"] })
    );
    assert_eq!(
        json_body(app.get("/api/obs/preview").await).await,
        serde_json::json!({ "success": true, "imageData": "data:image/jpeg;base64,AAAA" })
    );
    assert_eq!(
        json_body(app.get("/api/obs/status").await).await,
        serde_json::json!({ "status": "connected", "message": "Conectado ao OBS Studio" })
    );
}

#[tokio::test]
async fn offline_obs_status_is_still_200() {
    let app = TestApp::with(
        FakeScenes { online: false },
        FakeRelays {
            failing_channel: None,
            status_times_out: false,
        },
        Path::new("./static"),
    )
    .await;

    let response = app.get("/api/obs/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");

    let response = app.get("/api/obs/scenes").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .starts_with("Erro ao buscar cenas: "));
}

#[tokio::test]
async fn relay_control_maps_outcomes_to_status_codes() {
    let app = TestApp::with(
        FakeScenes { online: true },
        FakeRelays {
            failing_channel: Some(4),
            status_times_out: false,
        },
        Path::new("./static"),
    )
    .await;

    let response = app.post_form("/api/relay/control", "relay_id=frente&state=on").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "success": true,
            "message": "Teto 'FRENTE' alterado(s) para ON com sucesso"
        })
    );

    let response = app.post_form("/api/relay/control", "relay_id=meio&state=off").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "success": false,
            "message": "Falha ao alterar Teto 'MEIO'. Erros: Relé 4 travado"
        })
    );

    let response = app.post_form("/api/relay/control", "relay_id=99&state=on").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "ID de relé inválido: 99");

    let response = app.post_form("/api/relay/control", "relay_id=3").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn relay_status_timeout_is_service_unavailable() {
    let app = TestApp::with(
        FakeScenes { online: true },
        FakeRelays {
            failing_channel: None,
            status_times_out: true,
        },
        Path::new("./static"),
    )
    .await;
    let response = app.get("/api/relay/initial_status").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["success"], false);

    let ok = TestApp::new().await;
    let body = json_body(ok.get("/api/relay/initial_status").await).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"]["1"], "on");
}

#[tokio::test]
async fn static_assets_are_public() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("css")).expect("mkdir");
    std::fs::write(dir.path().join("css/painel.css"), "body {}").expect("write");

    let app = TestApp::with(
        FakeScenes { online: true },
        FakeRelays {
            failing_channel: None,
            status_times_out: false,
        },
        dir.path(),
    )
    .await;
    let response = app
        .send(
            Request::get("/static/css/painel.css")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "body {}");
}
