use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_control::{CommandRouter, HttpRelayDevice};
use serde::Deserialize;
use server_api::credentials::hash_password;
use shared::domain::RelayLayout;
use storage::{display_lyrics, NewSong, Storage, DEFAULT_SEARCH_LIMIT};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Operator utilities for the church control panel")]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/songs.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add one song to the hymnal.
    AddSong {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        categories: Option<String>,
    },
    Search {
        term: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
    },
    /// Bulk insert a JSON array of `{title, content, categories}`.
    Import { file: PathBuf },
    /// Print a hash for `admin_password_hash`.
    HashPassword { password: String },
    /// Send one command through the relay router and print the outcome.
    Relay {
        target: String,
        state: String,
        #[arg(long, env = "RELAY_API_BASE_URL", default_value = "http://10.149.0.136:5001")]
        base_url: String,
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
    },
}

#[derive(Debug, Deserialize)]
struct ImportedSong {
    title: String,
    content: String,
    #[serde(default)]
    categories: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::AddSong {
            title,
            content,
            categories,
        } => {
            let storage = Storage::new(&cli.database_url).await?;
            let song_id = storage
                .add_song(&NewSong {
                    title,
                    content,
                    categories,
                })
                .await?;
            println!("created song_id={}", song_id.0);
        }
        Command::Search { term, limit } => {
            let storage = Storage::new(&cli.database_url).await?;
            let songs = storage.search_songs(&term, limit).await?;
            if songs.is_empty() {
                println!("no songs match '{term}'");
            }
            for song in songs {
                println!("#{} {}", song.id.0, song.title);
                println!("    {}", display_lyrics(&song.content));
                if let Some(categories) = song.categories {
                    println!("    [{categories}]");
                }
            }
        }
        Command::Import { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            let songs: Vec<ImportedSong> = serde_json::from_str(&raw)
                .with_context(|| format!("'{}' is not a JSON array of songs", file.display()))?;
            let storage = Storage::new(&cli.database_url).await?;
            for song in &songs {
                if song.title.trim().is_empty() {
                    bail!("song with empty title in '{}'", file.display());
                }
                storage
                    .add_song(&NewSong {
                        title: song.title.clone(),
                        content: song.content.clone(),
                        categories: song.categories.clone(),
                    })
                    .await?;
            }
            println!(
                "imported {} songs; hymnal now has {}",
                songs.len(),
                storage.count_songs().await?
            );
        }
        Command::HashPassword { password } => {
            println!("{}", hash_password(&password));
        }
        Command::Relay {
            target,
            state,
            base_url,
            timeout_ms,
        } => {
            let timeout = Duration::from_millis(timeout_ms);
            let device = HttpRelayDevice::new(&base_url, timeout)?;
            let router = CommandRouter::new(Arc::new(device), Arc::new(RelayLayout::default()))
                .with_call_timeout(timeout);
            let outcome = router.dispatch(&target, &state).await?;
            for result in &outcome.results {
                println!(
                    "relay {} -> {}: {}",
                    result.channel,
                    result.requested_state,
                    if result.success { "ok" } else { result.message.as_str() }
                );
            }
            println!("{}", outcome.message);
            if !outcome.all_success {
                bail!("relay command failed");
            }
        }
    }

    Ok(())
}
