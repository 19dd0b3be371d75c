use anyhow::{Context, Result};
use futures::TryStreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{Song, SongId};

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const LYRICS_LINE_SEPARATOR: &str = "; ";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewSong {
    pub title: String,
    pub content: String,
    pub categories: Option<String>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to apply songs migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn add_song(&self, song: &NewSong) -> Result<SongId> {
        let rec = sqlx::query(
            "INSERT INTO songs (title, content, categories) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&song.title)
        .bind(&song.content)
        .bind(song.categories.as_deref())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert song '{}'", song.title))?;
        Ok(SongId(rec.get::<i64, _>(0)))
    }

    pub async fn get_song(&self, song_id: SongId) -> Result<Option<Song>> {
        let row = sqlx::query("SELECT id, title, content, categories FROM songs WHERE id = ?")
            .bind(song_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| song_from_row(&row)).transpose()
    }

    pub async fn count_songs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Case-insensitive substring match over title, content and categories,
    /// in id order, stopping after `limit` hits.
    ///
    /// Matching happens here rather than in `LIKE` because SQLite only folds
    /// ASCII case and the hymnal is full of accented capitals.
    pub async fn search_songs(&self, term: &str, limit: u32) -> Result<Vec<Song>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut rows =
            sqlx::query("SELECT id, title, content, categories FROM songs ORDER BY id")
                .fetch(&self.pool);
        let mut matches = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let song = song_from_row(&row)?;
            if song_matches(&song, &needle) {
                matches.push(song);
                if matches.len() >= limit as usize {
                    break;
                }
            }
        }
        debug!(term, hits = matches.len(), "songs: search finished");
        Ok(matches)
    }
}

/// Collapses stored line breaks (real newlines or literal `\n` markers) into
/// the single-line separator used by the hymnal view.
pub fn display_lyrics(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .replace("\\n", "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(LYRICS_LINE_SEPARATOR)
}

fn song_matches(song: &Song, needle: &str) -> bool {
    song.title.to_lowercase().contains(needle)
        || song.content.to_lowercase().contains(needle)
        || song
            .categories
            .as_deref()
            .is_some_and(|categories| categories.to_lowercase().contains(needle))
}

fn song_from_row(row: &SqliteRow) -> Result<Song> {
    Ok(Song {
        id: SongId(row.try_get("id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        categories: row.try_get("categories")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
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

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
