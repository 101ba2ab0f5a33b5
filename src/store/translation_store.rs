//! 翻訳データの永続キャッシュ
//!
//! 国名をキーとしたバージョン付きキャッシュです。キャッシュはベストエフォートで、
//! 内部のエラーはすべて `None` / `false` に変換され、呼び出し元には伝播しません。
//!
//! # 初期化
//!
//! `open` はメモ化されます。初期化中に呼ばれた場合は進行中の初期化結果を共有し、
//! 二重に初期化することはありません。保存済みのバージョンタグが
//! [`CURRENT_VERSION`] と異なる場合、データベース全体を削除してから作り直します。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{
    BoxFuture,
    Shared,
};
use thiserror::Error;
use tokio::sync::Mutex;

use super::codec::{
    self,
    CodecError,
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
    LocationRecord,
    VersionTag,
};

/// Cache schema version. A database tagged with any other version is wiped on open.
pub const CURRENT_VERSION: &str = "1.0.9";

/// Delay before the single retry of a blocked database deletion.
pub const DELETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// An open connection shared by every store operation.
type Connection = Arc<dyn StoreConnection>;

/// Initialization shared by concurrent openers.
type SharedOpen = Shared<BoxFuture<'static, Option<Connection>>>;

/// Write shared by concurrent puts for the same country.
type SharedWrite = Shared<BoxFuture<'static, bool>>;

/// ストア内部のエラー（境界で `None` / `false` に変換される）
#[derive(Error, Debug)]
pub(crate) enum StoreError {
    #[error("persistent storage is not available")]
    Unavailable,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cached payload is malformed: {0}")]
    Codec(#[from] CodecError),
}

/// コネクションのライフサイクル
#[derive(Default)]
struct Lifecycle {
    /// Connection installed by a completed initialization
    handle: Option<Connection>,
    /// Initialization in flight
    init: Option<SharedOpen>,
    /// Bumped by `close`; an initialization started under an older
    /// generation does not install its connection
    generation: u64,
}

/// `TranslationStore` の共有状態
struct StoreInner {
    /// Storage facility
    engine: Arc<dyn StorageEngine>,
    /// Handle and initialization state
    lifecycle: Mutex<Lifecycle>,
    /// Country → write in flight
    pending_writes: Mutex<HashMap<String, SharedWrite>>,
}

/// Durable, versioned cache of [`LocationRecord`]s keyed by country.
///
/// Cloning is cheap; clones share the connection and the in-flight tables.
#[derive(Clone)]
pub struct TranslationStore {
    /// Shared state
    inner: Arc<StoreInner>,
}

impl fmt::Debug for TranslationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationStore")
            .field("engine", &self.inner.engine)
            .field("lifecycle", &"<Mutex<Lifecycle>>")
            .field("pending_writes", &"<Mutex<HashMap<String, SharedWrite>>>")
            .finish()
    }
}

impl TranslationStore {
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                engine,
                lifecycle: Mutex::new(Lifecycle::default()),
                pending_writes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wraps a concrete engine.
    #[must_use]
    pub fn with_engine<E: StorageEngine + 'static>(engine: E) -> Self {
        Self::new(Arc::new(engine))
    }

    /// Whether the underlying storage facility exists. Never fails.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.engine.is_available()
    }

    /// The compiled-in cache version.
    #[must_use]
    pub const fn version(&self) -> &'static str {
        CURRENT_VERSION
    }

    /// Whether a connection is currently installed.
    pub async fn is_open(&self) -> bool {
        self.inner.lifecycle.lock().await.handle.is_some()
    }

    /// データベースを開く
    ///
    /// 接続済みならそのコネクションを返し、初期化中なら進行中の初期化を待ちます。
    /// 初期化に失敗した場合は `None` を返し、次回の呼び出しで再試行します。
    pub async fn open(&self) -> Option<Connection> {
        if !self.is_available() {
            return None;
        }

        let init = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if let Some(handle) = &lifecycle.handle {
                return Some(Arc::clone(handle));
            }
            if let Some(init) = &lifecycle.init {
                init.clone()
            } else {
                let init = Self::start_initialization(&self.inner, lifecycle.generation);
                lifecycle.init = Some(init.clone());
                init
            }
        };

        init.await
    }

    /// 初期化タスクを起動し、共有可能な Future を返す
    fn start_initialization(inner: &Arc<StoreInner>, generation: u64) -> SharedOpen {
        let task = tokio::spawn(Arc::clone(inner).initialize(generation));
        let inner = Arc::clone(inner);
        async move {
            match task.await {
                Ok(connection) => connection,
                Err(error) => {
                    tracing::warn!(%error, "Cache initialization task failed");
                    inner.abandon_initialization(generation).await;
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Looks up the cached record for `country`.
    ///
    /// Returns `None` on a miss, when storage is unavailable, or on any error.
    pub async fn get(&self, country: &str) -> Option<LocationRecord> {
        match self.try_get(country).await {
            Ok(record) => record,
            Err(StoreError::Unavailable) => None,
            Err(error) => {
                tracing::debug!(country, %error, "Cache read failed");
                None
            }
        }
    }

    /// キャッシュからの読み込み本体
    async fn try_get(&self, country: &str) -> Result<Option<LocationRecord>, StoreError> {
        let connection = self.open().await.ok_or(StoreError::Unavailable)?;
        let Some(entry) = connection.get_entry(country).await? else {
            return Ok(None);
        };
        Ok(Some(codec::decode(&entry.country, &entry.data)?))
    }

    /// Upserts the record for `country` with a fresh timestamp.
    ///
    /// A put issued while another put for the same country is in flight
    /// shares that write's outcome instead of writing again. Returns `true`
    /// only once the write is committed.
    pub async fn put(&self, country: &str, record: &LocationRecord) -> bool {
        let write = {
            let mut pending = self.inner.pending_writes.lock().await;
            if let Some(write) = pending.get(country) {
                tracing::debug!(country, "Joining in-flight cache write");
                write.clone()
            } else {
                let entry = CacheEntry {
                    id: country.to_string(),
                    country: country.to_string(),
                    data: codec::encode(record),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                let write = self.start_write(entry);
                pending.insert(country.to_string(), write.clone());
                write
            }
        };

        write.await
    }

    /// 書き込みタスクを起動し、共有可能な Future を返す
    ///
    /// タスクは完了時に自身を `pending_writes` から取り除く。
    fn start_write(&self, entry: CacheEntry) -> SharedWrite {
        let store = self.clone();
        let task = tokio::spawn(async move {
            let committed = match store.try_put(&entry).await {
                Ok(()) => true,
                Err(StoreError::Unavailable) => false,
                Err(error) => {
                    tracing::debug!(country = %entry.country, %error, "Cache write failed");
                    false
                }
            };
            store.inner.pending_writes.lock().await.remove(&entry.id);
            committed
        });
        async move { task.await.unwrap_or(false) }.boxed().shared()
    }

    /// キャッシュへの書き込み本体
    async fn try_put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let connection = self.open().await.ok_or(StoreError::Unavailable)?;
        connection.put_entry(entry).await?;
        Ok(())
    }

    /// Whether an entry exists for `country`. `false` on any error.
    pub async fn has(&self, country: &str) -> bool {
        let Some(connection) = self.open().await else {
            return false;
        };
        match connection.count_entries(country).await {
            Ok(count) => count > 0,
            Err(error) => {
                tracing::debug!(country, %error, "Cache existence check failed");
                false
            }
        }
    }

    /// Removes every cached record. The version tag is kept.
    pub async fn clear(&self) -> bool {
        let Some(connection) = self.open().await else {
            return false;
        };
        match connection.clear_entries().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, "Failed to clear cache");
                false
            }
        }
    }

    /// Deletes the whole database and opens a fresh one.
    ///
    /// A deletion blocked by other connections is retried once after
    /// [`DELETE_RETRY_DELAY`]; the call completes whatever the retry's
    /// outcome. Returns whether a fresh connection could be opened.
    pub async fn destroy_and_recreate(&self) -> bool {
        if !self.is_available() {
            return false;
        }
        self.close().await;
        self.inner.delete_with_retry().await;
        self.open().await.is_some()
    }

    /// Releases the connection and resets initialization state.
    pub async fn close(&self) {
        let handle = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            lifecycle.generation = lifecycle.generation.wrapping_add(1);
            lifecycle.init = None;
            lifecycle.handle.take()
        };
        if let Some(handle) = handle {
            handle.close().await;
            tracing::debug!("Cache database closed");
        }
    }
}

impl StoreInner {
    /// 初期化処理を行い、成功したらコネクションを登録する
    async fn initialize(self: Arc<Self>, generation: u64) -> Option<Connection> {
        let result = self.establish().await;

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.generation != generation {
            // close() が初期化中に呼ばれた
            drop(lifecycle);
            if let Ok(connection) = result {
                connection.close().await;
            }
            return None;
        }

        lifecycle.init = None;
        match result {
            Ok(connection) => {
                lifecycle.handle = Some(Arc::clone(&connection));
                Some(connection)
            }
            Err(error) => {
                tracing::debug!(%error, "Failed to open cache database");
                None
            }
        }
    }

    /// 初期化タスクが異常終了した場合に初期化状態を破棄する
    async fn abandon_initialization(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.generation == generation {
            lifecycle.init = None;
        }
    }

    /// バージョンを確認し、スキーマを整えたコネクションを返す
    async fn establish(&self) -> Result<Connection, EngineError> {
        let inspection = self.engine.connect().await?;
        let stale_version = Self::stale_version(inspection.as_ref()).await;
        inspection.close().await;

        if let Some(stored) = stale_version {
            tracing::info!(
                stored = %stored,
                current = CURRENT_VERSION,
                "Cache version changed, clearing database"
            );
            self.delete_with_retry().await;
        }

        let connection = self.engine.connect().await?;
        if let Err(error) = connection.upgrade_schema().await {
            connection.close().await;
            return Err(error);
        }
        if let Err(error) = connection.write_meta(&VersionTag::new(CURRENT_VERSION)).await {
            tracing::warn!(%error, "Failed to record cache version");
        }
        Ok(connection)
    }

    /// 保存済みのバージョンが現在のバージョンと異なる場合、その値を返す
    async fn stale_version(inspection: &dyn StoreConnection) -> Option<String> {
        match inspection.has_key_space(KeySpace::Meta).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Cache metadata missing, schema will be created");
                return None;
            }
            Err(error) => {
                tracing::debug!(%error, "Failed to inspect cache schema");
                return None;
            }
        }

        match inspection.read_meta(VersionTag::KEY).await {
            Ok(Some(stored)) if stored != CURRENT_VERSION => Some(stored),
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(%error, "Failed to read cache version");
                None
            }
        }
    }

    /// データベースを削除する（ブロックされた場合は一度だけ再試行）
    async fn delete_with_retry(&self) {
        match self.engine.delete_database().await {
            Ok(DeleteOutcome::Deleted) => return,
            Ok(DeleteOutcome::Blocked) => {
                tracing::warn!("Cache deletion blocked by open connections, retrying");
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to delete cache database");
                return;
            }
        }

        tokio::time::sleep(DELETE_RETRY_DELAY).await;
        match self.engine.delete_database().await {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::Blocked) => {
                tracing::warn!("Cache deletion still blocked, keeping existing database");
            }
            Err(error) => tracing::warn!(%error, "Failed to delete cache database"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use googletest::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::store::memory::MemoryEngine;
    use crate::test_utils::sample_record;

    fn store_with(engine: &MemoryEngine) -> TranslationStore {
        TranslationStore::with_engine(engine.clone())
    }

    fn stale_entry(country: &str) -> CacheEntry {
        CacheEntry {
            id: country.to_string(),
            country: country.to_string(),
            data: codec::encode(&sample_record(country)),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn open_creates_schema_and_records_version() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);

        assert!(store.open().await.is_some());

        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
        assert!(store.is_open().await);
        assert_eq!(store.version(), "1.0.9");
    }

    #[tokio::test]
    async fn open_is_memoized() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);

        let first = store.open().await.unwrap();
        let second = store.open().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // version check + working connection
        assert_eq!(engine.connect_count(), 2);
    }

    #[googletest::test]
    #[tokio::test]
    async fn concurrent_opens_share_one_initialization() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);

        let handles = futures::future::join_all((0..8).map(|_| store.open())).await;

        assert!(handles.iter().all(Option::is_some));
        assert_eq!(engine.connect_count(), 2);
        expect_that!(engine.open_connection_count(), eq(1));
    }

    #[tokio::test]
    async fn failed_open_is_retried_on_next_call() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);

        engine.fail_connect(true);
        assert!(store.open().await.is_none());

        engine.fail_connect(false);
        assert!(store.open().await.is_some());
    }

    #[tokio::test]
    async fn version_mismatch_wipes_database() {
        let engine = MemoryEngine::new();
        engine.seed_version("0.0.1").await;
        engine.seed_entry(stale_entry("Japan")).await;
        let store = store_with(&engine);

        assert_eq!(store.get("Japan").await, None);

        assert_eq!(engine.deletion_count(), 1);
        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
        assert!(engine.stored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn matching_version_keeps_data() {
        let engine = MemoryEngine::new();
        engine.seed_version(CURRENT_VERSION).await;
        engine.seed_entry(stale_entry("Japan")).await;
        let store = store_with(&engine);

        assert_eq!(store.get("Japan").await, Some(sample_record("Japan")));
        assert_eq!(engine.deletion_count(), 0);
    }

    #[tokio::test]
    async fn missing_metadata_is_upgraded_without_wipe() {
        let engine = MemoryEngine::new();
        engine.seed_without_meta(vec![stale_entry("China")]).await;
        let store = store_with(&engine);

        assert!(store.has("China").await);

        assert_eq!(engine.deletion_count(), 0);
        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
    }

    #[tokio::test]
    async fn version_write_failure_does_not_block_access() {
        let engine = MemoryEngine::new();
        engine.fail_writes(true);
        let store = store_with(&engine);

        assert!(store.open().await.is_some());

        assert_eq!(engine.stored_version().await, None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        let record = sample_record("Australia");

        assert!(store.put("Australia", &record).await);

        assert_eq!(store.get("Australia").await, Some(record));
        assert!(store.has("Australia").await);
        assert!(!store.has("China").await);
    }

    #[tokio::test]
    async fn concurrent_puts_for_same_country_are_coalesced() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        store.open().await.unwrap();
        let record = sample_record("Australia");

        let results =
            futures::future::join_all((0..5).map(|_| store.put("Australia", &record))).await;

        assert!(results.into_iter().all(|committed| committed));
        assert_eq!(engine.write_count(), 1);
    }

    #[tokio::test]
    async fn puts_for_different_countries_are_independent() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        let japan = sample_record("Japan");
        let china = sample_record("China");

        let (a, b) = tokio::join!(store.put("Japan", &japan), store.put("China", &china));

        assert!(a && b);
        assert_eq!(engine.stored_ids().await, vec!["China".to_string(), "Japan".to_string()]);
    }

    #[tokio::test]
    async fn sequential_puts_write_again() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        let record = sample_record("Japan");

        assert!(store.put("Japan", &record).await);
        assert!(store.put("Japan", &record).await);

        assert_eq!(engine.write_count(), 2);
    }

    #[tokio::test]
    async fn write_failure_returns_false() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        store.open().await.unwrap();
        engine.fail_writes(true);

        assert!(!store.put("Japan", &sample_record("Japan")).await);
        assert!(!store.clear().await);
    }

    #[tokio::test]
    async fn read_failure_returns_none() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        assert!(store.put("Japan", &sample_record("Japan")).await);
        engine.fail_reads(true);

        assert_eq!(store.get("Japan").await, None);
        assert!(!store.has("Japan").await);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_miss() {
        let engine = MemoryEngine::new();
        engine.seed_version(CURRENT_VERSION).await;
        engine
            .seed_entry(CacheEntry {
                id: "Japan".to_string(),
                country: "Japan".to_string(),
                data: json!(["not", "a", "map"]),
                timestamp: 0,
            })
            .await;
        let store = store_with(&engine);

        assert_eq!(store.get("Japan").await, None);
    }

    #[tokio::test]
    async fn clear_keeps_version_tag() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        assert!(store.put("Japan", &sample_record("Japan")).await);

        assert!(store.clear().await);

        assert!(!store.has("Japan").await);
        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
    }

    #[tokio::test]
    async fn unavailable_store_degrades_silently() {
        let store = TranslationStore::with_engine(MemoryEngine::unavailable());

        assert!(!store.is_available());
        assert!(store.open().await.is_none());
        assert_eq!(store.get("Japan").await, None);
        assert!(!store.put("Japan", &sample_record("Japan")).await);
        assert!(!store.has("Japan").await);
        assert!(!store.clear().await);
        assert!(!store.destroy_and_recreate().await);
    }

    #[tokio::test]
    async fn close_resets_and_reopens() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        let first = store.open().await.unwrap();

        store.close().await;

        assert!(!store.is_open().await);
        assert_eq!(engine.open_connection_count(), 0);
        let second = store.open().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn destroy_and_recreate_drops_all_data() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        assert!(store.put("Japan", &sample_record("Japan")).await);

        assert!(store.destroy_and_recreate().await);

        assert_eq!(engine.deletion_count(), 1);
        assert!(!store.has("Japan").await);
        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
    }

    #[tokio::test]
    async fn destroy_completes_when_deletion_stays_blocked() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        assert!(store.put("Japan", &sample_record("Japan")).await);
        let external = engine.open_external_connection().await.unwrap();

        assert!(store.destroy_and_recreate().await);

        assert_eq!(engine.blocked_deletion_count(), 2);
        assert_eq!(engine.deletion_count(), 0);
        assert!(store.has("Japan").await);
        external.close().await;
    }

    #[tokio::test]
    async fn destroy_succeeds_when_blocker_closes_before_retry() {
        let engine = MemoryEngine::new();
        let store = store_with(&engine);
        assert!(store.put("Japan", &sample_record("Japan")).await);
        let external = engine.open_external_connection().await.unwrap();
        let blocker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            external.close().await;
        });

        assert!(store.destroy_and_recreate().await);

        blocker.await.unwrap();
        assert_eq!(engine.blocked_deletion_count(), 1);
        assert_eq!(engine.deletion_count(), 1);
        assert!(!store.has("Japan").await);
        assert_eq!(engine.stored_version().await.as_deref(), Some(CURRENT_VERSION));
    }

    #[googletest::test]
    #[tokio::test]
    async fn close_during_initialization_discards_its_connection() {
        let engine = MemoryEngine::new().with_connect_delay(Duration::from_millis(50));
        let store = store_with(&engine);
        let opening = tokio::spawn({
            let store = store.clone();
            async move { store.open().await.is_some() }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.close().await;

        assert!(!opening.await.unwrap());
        assert!(!store.is_open().await);
        assert_eq!(engine.open_connection_count(), 0);
        assert_eq!(engine.connect_count(), 2);

        assert!(store.open().await.is_some());
        assert!(store.is_open().await);
        assert_eq!(engine.connect_count(), 4);
        expect_that!(engine.open_connection_count(), eq(1));
    }
}
