//! In-process storage engine.
//!
//! Mirrors the behavior of the SQLite engine without touching the disk:
//! connections are tracked so deletion can be blocked, and faults can be
//! injected to exercise the error paths of `TranslationStore`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

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

/// メモリ上のデータベース
///
/// キー空間が存在しない状態は `None` で表す。
#[derive(Debug, Default)]
struct MemoryDatabase {
    /// Records key space
    records: Option<HashMap<String, CacheEntry>>,
    /// Meta key space
    meta: Option<HashMap<String, String>>,
}

/// Operation counters, mainly for tests.
#[derive(Debug, Default)]
struct Counters {
    /// `connect` calls
    connects: AtomicUsize,
    /// `get_entry` calls
    reads: AtomicUsize,
    /// Committed `put_entry` calls
    writes: AtomicUsize,
    /// Successful deletions
    deletions: AtomicUsize,
    /// Deletions reported as blocked
    blocked_deletions: AtomicUsize,
}

/// Fault switches.
#[derive(Debug, Default)]
struct Faults {
    /// `connect` fails
    connect: AtomicBool,
    /// `read_meta` / `get_entry` / `count_entries` fail
    reads: AtomicBool,
    /// `write_meta` / `put_entry` / `clear_entries` fail
    writes: AtomicBool,
}

/// エンジンとコネクション間で共有される状態
#[derive(Debug, Default)]
struct Shared {
    /// `None` when no database exists
    database: Mutex<Option<MemoryDatabase>>,
    /// Currently open connections
    open_connections: AtomicUsize,
    /// Operation counters
    counters: Counters,
    /// Fault switches
    faults: Faults,
}

/// In-memory [`StorageEngine`].
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    /// Whether the engine reports itself available
    available: bool,
    /// Sleep before `connect` completes
    connect_delay: Option<Duration>,
    /// Sleep before `put_entry` commits
    write_delay: Option<Duration>,
    /// State shared with connections
    shared: Arc<Shared>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: true,
            connect_delay: None,
            write_delay: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// An engine that reports the storage facility as absent.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { available: false, ..Self::new() }
    }

    /// Makes every `connect` take at least `delay`.
    #[must_use]
    pub const fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Makes every `put_entry` take at least `delay` before it commits.
    #[must_use]
    pub const fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Seeds a database holding only the given version tag, as an older
    /// release would have left it.
    pub async fn seed_version(&self, version: &str) {
        let mut database = self.shared.database.lock().await;
        let database = database.get_or_insert_with(MemoryDatabase::default);
        database.records.get_or_insert_with(HashMap::new);
        database
            .meta
            .get_or_insert_with(HashMap::new)
            .insert(VersionTag::KEY.to_string(), version.to_string());
    }

    /// Seeds a database with records but without the metadata key space.
    pub async fn seed_without_meta(&self, entries: Vec<CacheEntry>) {
        let mut database = self.shared.database.lock().await;
        let database = database.get_or_insert_with(MemoryDatabase::default);
        let records = database.records.get_or_insert_with(HashMap::new);
        for entry in entries {
            records.insert(entry.id.clone(), entry);
        }
        database.meta = None;
    }

    /// Inserts an entry directly, creating the records space if needed.
    pub async fn seed_entry(&self, entry: CacheEntry) {
        let mut database = self.shared.database.lock().await;
        let database = database.get_or_insert_with(MemoryDatabase::default);
        database.records.get_or_insert_with(HashMap::new).insert(entry.id.clone(), entry);
    }

    /// Version tag currently stored, if any.
    pub async fn stored_version(&self) -> Option<String> {
        let database = self.shared.database.lock().await;
        database.as_ref()?.meta.as_ref()?.get(VersionTag::KEY).cloned()
    }

    /// Ids of the stored entries, sorted.
    pub async fn stored_ids(&self) -> Vec<String> {
        let database = self.shared.database.lock().await;
        let mut ids: Vec<String> = database
            .as_ref()
            .and_then(|db| db.records.as_ref())
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Whether a database currently exists.
    pub async fn database_exists(&self) -> bool {
        self.shared.database.lock().await.is_some()
    }

    /// Opens a connection that is not owned by any store, as another tab or
    /// process would. While it stays open, deletions are blocked.
    ///
    /// # Errors
    /// Fails like [`StorageEngine::connect`].
    pub async fn open_external_connection(&self) -> Result<Arc<dyn StoreConnection>, EngineError> {
        self.connect().await
    }

    pub fn fail_connect(&self, fail: bool) {
        self.shared.faults.connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.faults.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.faults.writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.counters.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.shared.counters.reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.shared.counters.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn deletion_count(&self) -> usize {
        self.shared.counters.deletions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn blocked_deletion_count(&self) -> usize {
        self.shared.counters.blocked_deletions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn open_connection_count(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        self.shared.counters.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.shared.faults.connect.load(Ordering::SeqCst) {
            return Err(EngineError::Injected("connect failed".to_string()));
        }

        self.shared.database.lock().await.get_or_insert_with(MemoryDatabase::default);
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            write_delay: self.write_delay,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self) -> Result<DeleteOutcome, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        if self.shared.open_connections.load(Ordering::SeqCst) > 0 {
            self.shared.counters.blocked_deletions.fetch_add(1, Ordering::SeqCst);
            return Ok(DeleteOutcome::Blocked);
        }
        *self.shared.database.lock().await = None;
        self.shared.counters.deletions.fetch_add(1, Ordering::SeqCst);
        Ok(DeleteOutcome::Deleted)
    }
}

/// [`MemoryEngine`] へのコネクション
#[derive(Debug)]
struct MemoryConnection {
    /// Engine state
    shared: Arc<Shared>,
    /// Sleep before `put_entry` commits
    write_delay: Option<Duration>,
    /// Set once `close` ran
    closed: AtomicBool,
}

impl MemoryConnection {
    /// 閉じたコネクションでの操作を拒否する
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) { Err(EngineError::Closed) } else { Ok(()) }
    }

    /// 読み込み操作の前処理
    fn begin_read(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.shared.faults.reads.load(Ordering::SeqCst) {
            return Err(EngineError::Injected("read failed".to_string()));
        }
        Ok(())
    }

    /// 書き込み操作の前処理
    fn begin_write(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.shared.faults.writes.load(Ordering::SeqCst) {
            return Err(EngineError::Injected("write failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn has_key_space(&self, space: KeySpace) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let database = self.shared.database.lock().await;
        let Some(database) = database.as_ref() else {
            return Ok(false);
        };
        Ok(match space {
            KeySpace::Records => database.records.is_some(),
            KeySpace::Meta => database.meta.is_some(),
        })
    }

    async fn upgrade_schema(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut database = self.shared.database.lock().await;
        let database = database.get_or_insert_with(MemoryDatabase::default);
        database.records.get_or_insert_with(HashMap::new);
        database.meta.get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Result<Option<String>, EngineError> {
        self.begin_read()?;
        let database = self.shared.database.lock().await;
        let meta = database
            .as_ref()
            .and_then(|db| db.meta.as_ref())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Meta))?;
        Ok(meta.get(key).cloned())
    }

    async fn write_meta(&self, tag: &VersionTag) -> Result<(), EngineError> {
        self.begin_write()?;
        let mut database = self.shared.database.lock().await;
        let meta = database
            .as_mut()
            .and_then(|db| db.meta.as_mut())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Meta))?;
        meta.insert(tag.key.clone(), tag.value.clone());
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>, EngineError> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.begin_read()?;
        let database = self.shared.database.lock().await;
        let records = database
            .as_ref()
            .and_then(|db| db.records.as_ref())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Records))?;
        Ok(records.get(id).cloned())
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), EngineError> {
        self.begin_write()?;
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let mut database = self.shared.database.lock().await;
        let records = database
            .as_mut()
            .and_then(|db| db.records.as_mut())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Records))?;
        records.insert(entry.id.clone(), entry.clone());
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count_entries(&self, id: &str) -> Result<u64, EngineError> {
        self.begin_read()?;
        let database = self.shared.database.lock().await;
        let records = database
            .as_ref()
            .and_then(|db| db.records.as_ref())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Records))?;
        Ok(u64::from(records.contains_key(id)))
    }

    async fn clear_entries(&self) -> Result<(), EngineError> {
        self.begin_write()?;
        let mut database = self.shared.database.lock().await;
        let records = database
            .as_mut()
            .and_then(|db| db.records.as_mut())
            .ok_or(EngineError::MissingKeySpace(KeySpace::Records))?;
        records.clear();
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
