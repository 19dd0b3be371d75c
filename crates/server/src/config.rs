use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use scene_control::ObsConfig;
use serde::Deserialize;
use server_api::credentials::{hash_password, UserDirectory};
use shared::domain::{LayoutError, RelayGroup, RelayLayout, DEFAULT_RELAY_CHANNEL_COUNT};
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub relay_api_base_url: String,
    pub relay_timeout_ms: u64,
    pub relay_channel_count: u8,
    pub relay_groups: Vec<RelayGroupSettings>,
    pub obs_host: String,
    pub obs_port: u16,
    pub obs_password: String,
    pub obs_timeout_ms: u64,
    pub admin_username: String,
    pub admin_password_hash: Option<String>,
    pub admin_password: String,
    pub session_secret: Option<String>,
    pub session_ttl_seconds: i64,
    pub static_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayGroupSettings {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub channels: Vec<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".into(),
            database_url: "sqlite://./data/songs.db".into(),
            relay_api_base_url: "http://10.149.0.136:5001".into(),
            relay_timeout_ms: 3000,
            relay_channel_count: DEFAULT_RELAY_CHANNEL_COUNT,
            relay_groups: RelayLayout::default()
                .groups()
                .iter()
                .map(|group| RelayGroupSettings {
                    name: group.name.clone(),
                    label: Some(group.label.clone()),
                    channels: group.channels.iter().map(|channel| channel.0).collect(),
                })
                .collect(),
            obs_host: "localhost".into(),
            obs_port: 4444,
            obs_password: String::new(),
            obs_timeout_ms: 5000,
            admin_username: "admin".into(),
            admin_password_hash: None,
            admin_password: DEFAULT_ADMIN_PASSWORD.into(),
            session_secret: None,
            session_ttl_seconds: 12 * 60 * 60,
            static_dir: "./static".into(),
        }
    }
}

impl Settings {
    pub fn relay_layout(&self) -> Result<RelayLayout, LayoutError> {
        let groups = self
            .relay_groups
            .iter()
            .map(|group| {
                let relay_group = RelayGroup::new(group.name.clone(), group.channels.clone());
                match &group.label {
                    Some(label) if !label.trim().is_empty() => relay_group.with_label(label.clone()),
                    _ => relay_group,
                }
            })
            .collect();
        RelayLayout::new(self.relay_channel_count, groups)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }

    pub fn obs_config(&self) -> ObsConfig {
        ObsConfig {
            host: self.obs_host.clone(),
            port: self.obs_port,
            password: Some(self.obs_password.clone()).filter(|password| !password.is_empty()),
            timeout: Duration::from_millis(self.obs_timeout_ms),
        }
    }

    pub fn user_directory(&self) -> anyhow::Result<UserDirectory> {
        let hash = match &self.admin_password_hash {
            Some(hash) => hash.clone(),
            None => {
                if self.admin_password == DEFAULT_ADMIN_PASSWORD {
                    warn!(
                        username = %self.admin_username,
                        "using the default admin password; set admin_password_hash"
                    );
                }
                hash_password(&self.admin_password)
            }
        };
        UserDirectory::new()
            .with_user(&self.admin_username, &hash)
            .context("invalid admin credentials")
    }

    /// A missing secret gets a per-process random one, so sessions end on restart.
    pub fn session_secret(&self) -> String {
        match &self.session_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new("server.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file when present, then environment overrides.
/// Among environment names the later ones win.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        toml::from_str::<Settings>(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?
    } else {
        Settings::default()
    };

    override_string(&mut settings.bind_addr, &env, &["SERVER_BIND", "APP__BIND_ADDR"]);
    override_string(
        &mut settings.database_url,
        &env,
        &["DATABASE_URL", "APP__DATABASE_URL"],
    );
    override_string(
        &mut settings.relay_api_base_url,
        &env,
        &["RELAY_API_BASE_URL", "APP__RELAY_API_BASE_URL"],
    );
    override_parsed(&mut settings.relay_timeout_ms, &env, &["APP__RELAY_TIMEOUT_MS"])?;
    override_parsed(
        &mut settings.relay_channel_count,
        &env,
        &["APP__RELAY_CHANNEL_COUNT"],
    )?;
    override_string(&mut settings.obs_host, &env, &["OBS_HOST", "APP__OBS_HOST"]);
    override_parsed(&mut settings.obs_port, &env, &["OBS_PORT", "APP__OBS_PORT"])?;
    override_string(
        &mut settings.obs_password,
        &env,
        &["OBS_PASSWORD", "APP__OBS_PASSWORD"],
    );
    override_parsed(&mut settings.obs_timeout_ms, &env, &["APP__OBS_TIMEOUT_MS"])?;
    override_string(
        &mut settings.admin_username,
        &env,
        &["APP__ADMIN_USERNAME"],
    );
    if let Some(hash) = last_env(&env, &["APP__ADMIN_PASSWORD_HASH"]) {
        settings.admin_password_hash = Some(hash);
    }
    override_string(
        &mut settings.admin_password,
        &env,
        &["APP__ADMIN_PASSWORD"],
    );
    if let Some(secret) = last_env(&env, &["APP__SESSION_SECRET"]) {
        settings.session_secret = Some(secret);
    }
    override_parsed(
        &mut settings.session_ttl_seconds,
        &env,
        &["APP__SESSION_TTL_SECONDS"],
    )?;
    override_string(&mut settings.static_dir, &env, &["APP__STATIC_DIR"]);

    Ok(settings)
}

fn last_env(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().rev().find_map(|key| env(key))
}

fn override_string(target: &mut String, env: &impl Fn(&str) -> Option<String>, keys: &[&str]) {
    if let Some(value) = last_env(env, keys) {
        *target = value;
    }
}

fn override_parsed<T>(
    target: &mut T,
    env: &impl Fn(&str) -> Option<String>,
    keys: &[&str],
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    for key in keys.iter().rev() {
        if let Some(raw) = env(key) {
            *target = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid value '{raw}' for {key}: {e}"))?;
            break;
        }
    }
    Ok(())
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite:{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
