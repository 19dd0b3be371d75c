use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::join_all;
use shared::{
    domain::{RelayChannel, RelayLayout, RelayState},
    protocol::{ChannelCommandResult, GroupCommandOutcome},
};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::device::{RelayDevice, RelayDeviceError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Rejections raised before any device call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("Parâmetros inválidos (relay_id e state são obrigatórios)")]
    InvalidParameters,
    #[error("ID de relé inválido: {0}")]
    InvalidTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    Group { name: String, label: String },
    Channel(RelayChannel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: RelayTarget,
    pub channels: Vec<RelayChannel>,
}

impl ResolvedTarget {
    /// Name shown to the operator: ceiling section for groups, row for channels.
    pub fn display_name(&self) -> String {
        match &self.target {
            RelayTarget::Group { label, .. } => format!("Teto '{label}'"),
            RelayTarget::Channel(channel) => format!("Fileira {channel}"),
        }
    }
}

#[derive(Clone)]
pub struct CommandRouter {
    device: Arc<dyn RelayDevice>,
    layout: Arc<RelayLayout>,
    call_timeout: Duration,
}

impl CommandRouter {
    pub fn new(device: Arc<dyn RelayDevice>, layout: Arc<RelayLayout>) -> Self {
        Self {
            device,
            layout,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn layout(&self) -> &RelayLayout {
        &self.layout
    }

    /// Group names win over numbers, so a group called "3" shadows channel 3.
    pub fn resolve(&self, target: &str) -> Result<ResolvedTarget, RouterError> {
        if let Some(group) = self.layout.group(target) {
            return Ok(ResolvedTarget {
                target: RelayTarget::Group {
                    name: group.name.clone(),
                    label: group.label.clone(),
                },
                channels: group.channels.clone(),
            });
        }

        let channel = target
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|number| self.layout.channel(number))
            .ok_or_else(|| RouterError::InvalidTarget(target.to_string()))?;
        Ok(ResolvedTarget {
            target: RelayTarget::Channel(channel),
            channels: vec![channel],
        })
    }

    /// Validates `target` and `state`, then sends the command to every
    /// resolved channel. Device failures never surface as `Err`; they are
    /// folded into the outcome.
    pub async fn dispatch(
        &self,
        target: &str,
        state: &str,
    ) -> Result<GroupCommandOutcome, RouterError> {
        if target.is_empty() {
            warn!(relay_id = target, state, "relay: rejected command with missing target");
            return Err(RouterError::InvalidParameters);
        }
        let state: RelayState = state.parse().map_err(|_| {
            warn!(relay_id = target, state, "relay: rejected command with invalid state");
            RouterError::InvalidParameters
        })?;
        let resolved = self.resolve(target).map_err(|err| {
            warn!(relay_id = target, "relay: rejected command for unknown target");
            err
        })?;

        info!(
            relay_target = %resolved.display_name(),
            channels = ?resolved.channels,
            state = state.label(),
            "relay: dispatching command"
        );

        let results = join_all(
            resolved
                .channels
                .iter()
                .map(|channel| self.command_channel(*channel, state)),
        )
        .await;

        Ok(aggregate(&resolved, state, results))
    }

    pub async fn status(&self) -> Result<BTreeMap<String, String>, RelayDeviceError> {
        match timeout(self.call_timeout, self.device.status()).await {
            Ok(result) => result,
            Err(_) => Err(RelayDeviceError::Timeout),
        }
    }

    async fn command_channel(
        &self,
        channel: RelayChannel,
        state: RelayState,
    ) -> ChannelCommandResult {
        let call = self.device.set_state(channel, state);
        let outcome = match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RelayDeviceError::Timeout),
        };

        match outcome {
            Ok(ack) => {
                info!(channel = channel.0, state = state.label(), "relay: channel switched");
                ChannelCommandResult {
                    channel,
                    requested_state: state,
                    success: true,
                    message: ack.message.unwrap_or_else(|| {
                        format!("Relé {channel} alterado para {}", state.label())
                    }),
                }
            }
            Err(err) => {
                let message = failure_message(channel, &err);
                error!(
                    channel = channel.0,
                    state = state.label(),
                    error = %err,
                    "relay: {message}"
                );
                ChannelCommandResult {
                    channel,
                    requested_state: state,
                    success: false,
                    message,
                }
            }
        }
    }
}

fn failure_message(channel: RelayChannel, err: &RelayDeviceError) -> String {
    match err {
        RelayDeviceError::Timeout => format!("Timeout ao conectar com API do relé {channel}"),
        RelayDeviceError::Transport(detail) => {
            format!("Erro de conexão/requisição para API do relé {channel}: {detail}")
        }
        RelayDeviceError::Rejected(Some(message)) if !message.trim().is_empty() => message.clone(),
        RelayDeviceError::Rejected(_) => format!("Erro na API do relé {channel}"),
        RelayDeviceError::Unexpected(detail) => {
            format!("Erro inesperado ao controlar relé {channel}: {detail}")
        }
    }
}

fn aggregate(
    resolved: &ResolvedTarget,
    state: RelayState,
    results: Vec<ChannelCommandResult>,
) -> GroupCommandOutcome {
    let all_success = results.iter().all(|result| result.success);
    let name = resolved.display_name();
    let message = if all_success {
        format!("{name} alterado(s) para {} com sucesso", state.label())
    } else {
        let errors = results
            .iter()
            .filter(|result| !result.success)
            .map(|result| result.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        format!("Falha ao alterar {name}. Erros: {errors}")
    };
    GroupCommandOutcome {
        all_success,
        results,
        message,
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
