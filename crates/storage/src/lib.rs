use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use shared::domain::Session;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

/// Slot holding the last known [`Session`].
pub const SESSION_CACHE_KEY: &str = "user";
/// Slot holding the serialized cookie header for the booking backend.
pub const COOKIE_CACHE_KEY: &str = "session_cookie";

/// Durable local cache backed by SQLite.
///
/// Every slot is a single row that writers replace or delete as a whole, so
/// readers never observe a partially written value.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub updated_at: Option<NaiveDateTime>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid cache database url '{database_url}'"))?
            .create_if_missing(true);
        // Every in-memory connection is its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
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

    pub async fn load_entry(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_cache WHERE cache_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read cache slot '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn store_entry(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO local_cache (cache_key, value, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(cache_key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write cache slot '{key}'"))?;
        Ok(())
    }

    /// Returns whether a slot was actually removed.
    pub async fn remove_entry(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM local_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to clear cache slot '{key}'"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            "SELECT cache_key, value, updated_at FROM local_cache ORDER BY cache_key",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list cache slots")?;

        rows.into_iter()
            .map(|row| -> Result<CacheEntry> {
                Ok(CacheEntry {
                    key: row.try_get("cache_key")?,
                    value: row.try_get("value")?,
                    updated_at: row.try_get::<Option<NaiveDateTime>, _>("updated_at")?,
                })
            })
            .collect()
    }

    /// Reads the cached session. A slot that no longer decodes is reported as
    /// absent.
    pub async fn load_session(&self) -> Result<Option<Session>> {
        let Some(raw) = self.load_entry(SESSION_CACHE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(error) => {
                warn!(%error, "discarding unreadable cached session");
                Ok(None)
            }
        }
    }

    pub async fn store_session(&self, session: &Session) -> Result<()> {
        let encoded = serde_json::to_string(session).context("failed to encode session")?;
        self.store_entry(SESSION_CACHE_KEY, &encoded).await
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.remove_entry(SESSION_CACHE_KEY).await?;
        Ok(())
    }
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
