use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn no_env() -> impl Fn(&str) -> Option<String> {
    env_from(&[])
}

#[test]
fn defaults_apply_without_file_or_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_from(&dir.path().join("server.toml"), no_env()).expect("settings");
    assert_eq!(settings.bind_addr, "0.0.0.0:5000");
    assert_eq!(settings.relay_timeout(), Duration::from_secs(3));
    assert_eq!(settings.obs_config().url(), "ws://localhost:4444");
    assert_eq!(settings.obs_config().password, None);
    assert_eq!(settings.session_ttl_seconds, 43_200);
    assert_eq!(settings.relay_layout().expect("layout"), RelayLayout::default());
}

#[test]
fn file_values_overlay_defaults_and_env_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "127.0.0.1:8080"
obs_port = 4455
obs_password = "segredo"

[[relay_groups]]
name = "palco"
channels = [1, 2, 3]
"#,
    )
    .expect("write");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("SERVER_BIND", "127.0.0.1:9000"),
            ("APP__BIND_ADDR", "127.0.0.1:9100"),
            ("OBS_HOST", "obs.local"),
        ]),
    )
    .expect("settings");

    assert_eq!(settings.bind_addr, "127.0.0.1:9100");
    assert_eq!(settings.obs_host, "obs.local");
    assert_eq!(settings.obs_port, 4455);
    assert_eq!(settings.obs_config().password.as_deref(), Some("segredo"));
    assert_eq!(settings.database_url, "sqlite://./data/songs.db");

    let layout = settings.relay_layout().expect("layout");
    assert_eq!(layout.groups().len(), 1);
    let palco = layout.group("palco").expect("palco");
    assert_eq!(palco.label, "PALCO");
    assert_eq!(palco.channels.len(), 3);
}

#[test]
fn unparsable_numeric_env_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_settings_from(
        &dir.path().join("server.toml"),
        env_from(&[("OBS_PORT", "quatro")]),
    )
    .unwrap_err();
    assert!(err.to_string().contains("OBS_PORT"), "{err}");
}

#[test]
fn invalid_settings_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "obs_port = \"not a number\"").expect("write");
    assert!(load_settings_from(&path, no_env()).is_err());
}

#[test]
fn group_with_out_of_range_channel_is_rejected() {
    let settings = Settings {
        relay_groups: vec![RelayGroupSettings {
            name: "fundo".into(),
            label: None,
            channels: vec![5, 9],
        }],
        ..Settings::default()
    };
    assert!(matches!(
        settings.relay_layout(),
        Err(LayoutError::ChannelOutOfRange { .. })
    ));
}

#[test]
fn admin_password_is_hashed_when_no_hash_is_configured() {
    let settings = Settings {
        admin_password: "culto2024".into(),
        ..Settings::default()
    };
    let users = settings.user_directory().expect("users");
    assert!(users.verify("admin", "culto2024"));
    assert!(!users.verify("admin", DEFAULT_ADMIN_PASSWORD));
}

#[test]
fn configured_hash_takes_precedence_over_plain_password() {
    let hash = server_api::credentials::hash_password_with_rounds("outra", 1_000);
    let settings = Settings {
        admin_password_hash: Some(hash),
        ..Settings::default()
    };
    let users = settings.user_directory().expect("users");
    assert!(users.verify("admin", "outra"));
    assert!(!users.verify("admin", DEFAULT_ADMIN_PASSWORD));
}

#[test]
fn malformed_hash_is_rejected_at_startup() {
    let settings = Settings {
        admin_password_hash: Some("plaintext".into()),
        ..Settings::default()
    };
    assert!(settings.user_directory().is_err());
}

#[test]
fn missing_session_secret_is_random_per_call() {
    let settings = Settings::default();
    let first = settings.session_secret();
    assert_eq!(first.len(), 64);
    assert_ne!(first, settings.session_secret());

    let fixed = Settings {
        session_secret: Some("fixo".into()),
        ..Settings::default()
    };
    assert_eq!(fixed.session_secret(), "fixo");
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("  "), "sqlite://./data/songs.db");
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\igreja\\songs.db"),
        "sqlite:C:/Users/igreja/songs.db"
    );
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("songs.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    assert_eq!(storage.count_songs().await.expect("count"), 2);
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
