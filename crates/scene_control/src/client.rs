use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    protocol::{
        auth_response, op, Envelope, Hello, Identified, Identify, Request, RequestResponse,
        RPC_VERSION,
    },
    ObsVersion, SceneControl, SceneControlError, ScreenshotRequest,
};

type ObsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ObsConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 4444,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// One identified obs-websocket session, opened lazily and shared by every
/// request. A failed socket is dropped and the next call reconnects.
pub struct ObsClient {
    config: ObsConfig,
    session: Mutex<Option<ObsStream>>,
}

impl ObsClient {
    pub fn new(config: ObsConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ObsConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Sends one request and returns its `responseData` (or `null`).
    pub async fn call(
        &self,
        request_type: &str,
        request_data: Value,
    ) -> Result<Value, SceneControlError> {
        match timeout(self.config.timeout, self.call_inner(request_type, request_data)).await {
            Ok(result) => result,
            Err(_) => {
                // The abandoned exchange may have left a half-read reply behind.
                self.session.lock().await.take();
                warn!(request_type, "obs: request timed out; session dropped");
                Err(SceneControlError::Timeout)
            }
        }
    }

    pub async fn disconnect(&self) {
        if let Some(mut stream) = self.session.lock().await.take() {
            if let Err(err) = stream.close(None).await {
                debug!(%err, "obs: close handshake failed");
            }
            info!(url = %self.config.url(), "obs: session closed");
        }
    }

    async fn call_inner(
        &self,
        request_type: &str,
        request_data: Value,
    ) -> Result<Value, SceneControlError> {
        let mut guard = self.session.lock().await;
        let reused = guard.is_some();
        if !reused {
            *guard = Some(self.connect().await?);
        }
        let stream = guard
            .as_mut()
            .ok_or_else(|| SceneControlError::Closed("no session".into()))?;

        match exchange(stream, request_type, &request_data).await {
            Err(err) if err.is_transport() => {
                *guard = None;
                if !reused {
                    return Err(err);
                }
                warn!(request_type, %err, "obs: cached session failed; reconnecting once");
                let mut stream = self.connect().await?;
                let result = exchange(&mut stream, request_type, &request_data).await;
                if !matches!(&result, Err(err) if err.is_transport()) {
                    *guard = Some(stream);
                }
                result
            }
            other => other,
        }
    }

    async fn connect(&self) -> Result<ObsStream, SceneControlError> {
        let url = self.config.url();
        let (mut stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SceneControlError::Connect(format!("{url}: {e}")))?;

        let hello: Hello = read_op(&mut stream, op::HELLO).await?;
        let authentication = match (&hello.authentication, &self.config.password) {
            (Some(challenge), Some(password)) => Some(auth_response(
                password,
                &challenge.salt,
                &challenge.challenge,
            )),
            (Some(_), None) => {
                return Err(SceneControlError::Auth(
                    "o OBS exige senha, mas nenhuma foi configurada".into(),
                ))
            }
            (None, _) => None,
        };

        send_op(
            &mut stream,
            op::IDENTIFY,
            &Identify {
                rpc_version: RPC_VERSION,
                authentication,
                event_subscriptions: 0,
            },
        )
        .await?;
        let identified: Identified = read_op(&mut stream, op::IDENTIFIED)
            .await
            .map_err(|err| match err {
                SceneControlError::Closed(reason) => SceneControlError::Auth(reason),
                other => other,
            })?;

        info!(
            %url,
            obs_websocket_version = hello.obs_web_socket_version.as_deref().unwrap_or("unknown"),
            rpc_version = identified.negotiated_rpc_version,
            "obs: session identified"
        );
        Ok(stream)
    }
}

async fn exchange(
    stream: &mut ObsStream,
    request_type: &str,
    request_data: &Value,
) -> Result<Value, SceneControlError> {
    let request_id = Uuid::new_v4().to_string();
    send_op(
        stream,
        op::REQUEST,
        &Request {
            request_type: request_type.to_string(),
            request_id: request_id.clone(),
            request_data: request_data.clone(),
        },
    )
    .await?;

    loop {
        let response: RequestResponse = read_op(stream, op::REQUEST_RESPONSE).await?;
        if response.request_id != request_id {
            debug!(
                stale_request_id = %response.request_id,
                "obs: skipping response for an abandoned request"
            );
            continue;
        }
        if !response.request_status.result {
            let status = response.request_status;
            let message = status
                .comment
                .filter(|comment| !comment.is_empty())
                .unwrap_or_else(|| format!("Código de erro: {}", status.code));
            return Err(SceneControlError::Request {
                request_type: request_type.to_string(),
                message,
            });
        }
        return Ok(response.response_data.unwrap_or(Value::Null));
    }
}

async fn send_op<T: Serialize>(
    stream: &mut ObsStream,
    opcode: u8,
    payload: &T,
) -> Result<(), SceneControlError> {
    let text = serde_json::to_string(&Envelope { op: opcode, d: payload })
        .map_err(|e| SceneControlError::Protocol(e.to_string()))?;
    stream
        .send(Message::Text(text))
        .await
        .map_err(|e| SceneControlError::Transport(e.to_string()))
}

/// Reads until a message with `expected` opcode arrives; events and other
/// opcodes are skipped.
async fn read_op<T: DeserializeOwned>(
    stream: &mut ObsStream,
    expected: u8,
) -> Result<T, SceneControlError> {
    while let Some(message) = stream.next().await {
        let text = match message.map_err(|e| SceneControlError::Transport(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                let reason = frame
                    .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason))
                    .unwrap_or_else(|| "sem motivo".into());
                return Err(SceneControlError::Closed(reason.trim().to_string()));
            }
            _ => continue,
        };
        let envelope: Envelope<Value> = serde_json::from_str(&text)
            .map_err(|e| SceneControlError::Protocol(format!("invalid message: {e}")))?;
        if envelope.op == op::EVENT {
            continue;
        }
        if envelope.op != expected {
            debug!(op = envelope.op, expected, "obs: ignoring unexpected opcode");
            continue;
        }
        return serde_json::from_value(envelope.d)
            .map_err(|e| SceneControlError::Protocol(format!("invalid op {expected} payload: {e}")));
    }
    Err(SceneControlError::Closed("conexão encerrada pelo OBS".into()))
}

fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl SceneControl for ObsClient {
    async fn set_current_program_scene(&self, scene_name: &str) -> Result<(), SceneControlError> {
        self.call("SetCurrentProgramScene", json!({ "sceneName": scene_name }))
            .await
            .map(|_| ())
    }

    async fn scene_names(&self) -> Result<Vec<String>, SceneControlError> {
        let data = self.call("GetSceneList", Value::Null).await?;
        let scenes = data
            .get("scenes")
            .and_then(Value::as_array)
            .map(|scenes| {
                scenes
                    .iter()
                    .filter_map(|scene| string_field(scene, &["sceneName"]))
                    .collect()
            })
            .unwrap_or_default();
        Ok(scenes)
    }

    async fn current_program_scene(&self) -> Result<String, SceneControlError> {
        let data = self.call("GetCurrentProgramScene", Value::Null).await?;
        string_field(&data, &["currentProgramSceneName", "sceneName"]).ok_or_else(|| {
            SceneControlError::Protocol("Não foi possível obter a cena atual do programa.".into())
        })
    }

    async fn source_screenshot(
        &self,
        request: &ScreenshotRequest,
    ) -> Result<String, SceneControlError> {
        let request_data =
            serde_json::to_value(request).map_err(|e| SceneControlError::Protocol(e.to_string()))?;
        let data = self.call("GetSourceScreenshot", request_data).await?;
        string_field(&data, &["imageData"]).ok_or_else(|| {
            SceneControlError::Protocol(
                "Não foi possível obter os dados da imagem do screenshot.".into(),
            )
        })
    }

    async fn version(&self) -> Result<ObsVersion, SceneControlError> {
        let data = self.call("GetVersion", Value::Null).await?;
        serde_json::from_value(data).map_err(|e| SceneControlError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
