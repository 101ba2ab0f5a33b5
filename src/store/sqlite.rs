//! SQLite storage engine
//!
//! The cache database is a single SQLite file with two tables, `translations`
//! and `meta`. Connections go through a one-connection pool so concurrent
//! writers inside the process never hit `SQLITE_BUSY`.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
};

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions,
    SqliteJournalMode,
    SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{
    Row,
    SqlitePool,
};

use super::engine::{
    DeleteOutcome,
    EngineError,
    KeySpace,
    StorageEngine,
    StoreConnection,
};
use crate::types::{
    CacheEntry,
    VersionTag,
};

/// Schema statements, run by `upgrade_schema`.
const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS translations (
        id TEXT PRIMARY KEY,
        country TEXT NOT NULL,
        data TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS translations_country ON translations (country)",
    "CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// SQLite-backed [`StorageEngine`].
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    /// Database file
    path: PathBuf,
    /// Connections opened by this engine and not yet closed
    open_connections: Arc<AtomicUsize>,
}

impl SqliteEngine {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), open_connections: Arc::new(AtomicUsize::new(0)) }
    }

    /// `<user cache dir>/locations-zh/translations.db`, if the platform has a cache dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("locations-zh").join("translations.db"))
    }

    /// データベースファイルと WAL / SHM ファイルのパス
    fn database_files(&self) -> [PathBuf; 3] {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        let mut shm = self.path.clone().into_os_string();
        shm.push("-shm");
        [self.path.clone(), PathBuf::from(wal), PathBuf::from(shm)]
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    /// Available when the database file's directory exists.
    fn is_available(&self) -> bool {
        if self.path.as_os_str().is_empty() {
            return false;
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        }
    }

    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, EngineError> {
        if !self.is_available() {
            return Err(EngineError::Unavailable);
        }
        tracing::debug!(path = %self.path.display(), "Opening cache database");

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;

        self.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SqliteStoreConnection {
            pool,
            open_connections: Arc::clone(&self.open_connections),
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self) -> Result<DeleteOutcome, EngineError> {
        if self.open_connections.load(Ordering::SeqCst) > 0 {
            return Ok(DeleteOutcome::Blocked);
        }
        for file in self.database_files() {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => tracing::debug!(path = %file.display(), "Removed cache database file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(DeleteOutcome::Deleted)
    }
}

/// [`SqliteEngine`] へのコネクション
#[derive(Debug)]
struct SqliteStoreConnection {
    /// Single-connection pool
    pool: SqlitePool,
    /// Engine-wide open connection counter
    open_connections: Arc<AtomicUsize>,
    /// Set once `close` ran
    closed: AtomicBool,
}

impl SqliteStoreConnection {
    /// 閉じたコネクションでの操作を拒否する
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) { Err(EngineError::Closed) } else { Ok(()) }
    }
}

#[async_trait]
impl StoreConnection for SqliteStoreConnection {
    async fn has_key_space(&self, space: KeySpace) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(space.name())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn upgrade_schema(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut transaction = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *transaction).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Result<Option<String>, EngineError> {
        self.ensure_open()?;
        let value = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<String, _>("value"))
            .transpose()?;
        Ok(value)
    }

    async fn write_meta(&self, tag: &VersionTag) -> Result<(), EngineError> {
        self.ensure_open()?;
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&tag.key)
        .bind(&tag.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>, EngineError> {
        self.ensure_open()?;
        let Some(row) =
            sqlx::query("SELECT id, country, data, timestamp FROM translations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let data: String = row.try_get("data")?;
        Ok(Some(CacheEntry {
            id: row.try_get("id")?,
            country: row.try_get("country")?,
            data: serde_json::from_str(&data)?,
            timestamp: row.try_get("timestamp")?,
        }))
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), EngineError> {
        self.ensure_open()?;
        let data = serde_json::to_string(&entry.data)?;
        sqlx::query(
            "INSERT INTO translations (id, country, data, timestamp) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET country = excluded.country, \
             data = excluded.data, timestamp = excluded.timestamp",
        )
        .bind(&entry.id)
        .bind(&entry.country)
        .bind(data)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_entries(&self, id: &str) -> Result<u64, EngineError> {
        self.ensure_open()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM translations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn clear_entries(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        sqlx::query("DELETE FROM translations").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
            self.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
