//! ストレージエンジンの抽象化
//!
//! `TranslationStore` はこのトレイトを通して永続化層にアクセスします。
//! 各操作は非同期で、完了またはエラーまで中断します。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    CacheEntry,
    VersionTag,
};

/// Key spaces held by a cache database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    /// Cache entries keyed by id, indexed by country.
    Records,
    /// Metadata keyed by string (the version tag).
    Meta,
}

impl KeySpace {
    /// Table / space name used by the engines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Records => "translations",
            Self::Meta => "meta",
        }
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a database deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Other open connections prevent the deletion.
    Blocked,
}

/// エンジン操作のエラー
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("storage engine is not available in this environment")]
    Unavailable,

    #[error("connection is closed")]
    Closed,

    #[error("key space '{0}' does not exist")]
    MissingKeySpace(KeySpace),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored payload is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("{0}")]
    Injected(String),
}

/// A persistent storage facility holding one cache database.
#[async_trait]
pub trait StorageEngine: Send + Sync + fmt::Debug {
    /// Whether the facility exists in the current environment. Never fails.
    fn is_available(&self) -> bool;

    /// Opens a connection, creating an empty database (no key spaces) if none exists.
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, EngineError>;

    /// Deletes the whole database.
    ///
    /// Returns [`DeleteOutcome::Blocked`] while connections opened by this
    /// engine are still open.
    async fn delete_database(&self) -> Result<DeleteOutcome, EngineError>;
}

/// An open connection to a cache database.
#[async_trait]
pub trait StoreConnection: Send + Sync + fmt::Debug {
    async fn has_key_space(&self, space: KeySpace) -> Result<bool, EngineError>;

    /// Creates every missing key space (records with a country index, metadata).
    async fn upgrade_schema(&self) -> Result<(), EngineError>;

    async fn read_meta(&self, key: &str) -> Result<Option<String>, EngineError>;

    async fn write_meta(&self, tag: &VersionTag) -> Result<(), EngineError>;

    async fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>, EngineError>;

    /// Inserts or replaces the entry with the same id.
    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), EngineError>;

    async fn count_entries(&self, id: &str) -> Result<u64, EngineError>;

    /// Removes every entry from the records space, leaving metadata untouched.
    async fn clear_entries(&self) -> Result<(), EngineError>;

    /// Releases the connection. Further operations fail with [`EngineError::Closed`].
    async fn close(&self);
}
