use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use shared::domain::{Course, LearningPreferences};

pub const HISTORY_KEY: &str = "omni_history";
pub const PREFERENCES_KEY: &str = "omni_preferences";

/// Key-value persistence for the course history and learning preferences.
///
/// Both values are opaque JSON blobs; the bounding and de-duplication of the
/// history list is the caller's policy, not the store's.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load_history(&self) -> Result<Vec<Course>>;
    async fn save_history(&self, history: &[Course]) -> Result<()>;
    async fn load_preferences(&self) -> Result<Option<LearningPreferences>>;
    async fn save_preferences(&self, preferences: &LearningPreferences) -> Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_blob_table().await?;
        Ok(storage)
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

    async fn ensure_blob_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_blobs (
                key        TEXT PRIMARY KEY NOT NULL,
                value      BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure kv_blobs table exists")?;
        Ok(())
    }

    pub async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv_blobs WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    pub async fn put_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_blobs (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write blob '{key}'"))?;
        Ok(())
    }

    pub async fn delete_blob(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_blobs WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for Storage {
    async fn load_history(&self) -> Result<Vec<Course>> {
        match self.get_blob(HISTORY_KEY).await? {
            Some(bytes) => decode_history(&bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn save_history(&self, history: &[Course]) -> Result<()> {
        let bytes = serde_json::to_vec(history).context("failed to encode history")?;
        self.put_blob(HISTORY_KEY, &bytes).await
    }

    async fn load_preferences(&self) -> Result<Option<LearningPreferences>> {
        self.get_blob(PREFERENCES_KEY)
            .await?
            .map(|bytes| decode_preferences(&bytes))
            .transpose()
    }

    async fn save_preferences(&self, preferences: &LearningPreferences) -> Result<()> {
        let bytes = serde_json::to_vec(preferences).context("failed to encode preferences")?;
        self.put_blob(PREFERENCES_KEY, &bytes).await
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut guard = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        guard.insert(key.to_string(), value);
        Ok(())
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(key, value.to_vec())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_history(&self) -> Result<Vec<Course>> {
        match self.get(HISTORY_KEY)? {
            Some(bytes) => decode_history(&bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn save_history(&self, history: &[Course]) -> Result<()> {
        self.put(HISTORY_KEY, serde_json::to_vec(history)?)
    }

    async fn load_preferences(&self) -> Result<Option<LearningPreferences>> {
        self.get(PREFERENCES_KEY)?
            .map(|bytes| decode_preferences(&bytes))
            .transpose()
    }

    async fn save_preferences(&self, preferences: &LearningPreferences) -> Result<()> {
        self.put(PREFERENCES_KEY, serde_json::to_vec(preferences)?)
    }
}

fn decode_history(bytes: &[u8]) -> Result<Vec<Course>> {
    serde_json::from_slice(bytes).context("failed to parse stored history")
}

fn decode_preferences(bytes: &[u8]) -> Result<LearningPreferences> {
    serde_json::from_slice(bytes).context("failed to parse stored preferences")
}

/// Turns a plain path or partial sqlite url into a `sqlite://` url and makes
/// sure its parent directory exists.
pub fn prepare_database_url(raw_database_url: &str) -> Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() || raw_database_url.starts_with("sqlite::memory:") {
        return "sqlite::memory:".to_string();
    }

    if raw_database_url.starts_with("sqlite://") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
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
