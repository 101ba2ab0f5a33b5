use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use futures::FutureExt;
use futures::future::{
    BoxFuture,
    Shared,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::LookupError;
use crate::config::{
    CacheBackend,
    LocationsSettings,
};
use crate::source::{
    DataSource,
    JsonDataDir,
    SourceError,
};
use crate::store::{
    CURRENT_VERSION,
    MemoryEngine,
    SqliteEngine,
    TranslationStore,
};
use crate::types::{
    LocationPath,
    LocationRecord,
};

/// Load shared by every caller asking for the same country.
type SharedLoad = Shared<BoxFuture<'static, Result<Arc<LocationRecord>, LookupError>>>;

/// `preload_countries` の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Countries loaded, in request order
    pub succeeded: Vec<String>,
    /// Countries that failed, in request order
    pub failed: Vec<String>,
}

/// コーディネーターの共有状態
struct CoordinatorInner {
    /// Known countries and their data
    source: Arc<dyn DataSource>,
    /// Persistent cache, if one is configured
    store: Option<TranslationStore>,
    /// Whether the cache is consulted and written
    caching_enabled: AtomicBool,
    /// Country → load in flight
    in_flight: Mutex<HashMap<String, SharedLoad>>,
    /// Background cache writes not yet awaited. The tasks are detached, so
    /// dropping the coordinator does not cancel them.
    write_backs: Mutex<Vec<JoinHandle<()>>>,
}

/// Resolves country names to their [`LocationRecord`], cache first.
///
/// Cloning is cheap; clones share the in-flight table and the store.
#[derive(Clone)]
pub struct LookupCoordinator {
    /// Shared state
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for LookupCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupCoordinator")
            .field("source", &self.inner.source)
            .field("store", &self.inner.store)
            .field("caching_enabled", &self.is_caching_enabled())
            .field("in_flight", &"<Mutex<HashMap<String, SharedLoad>>>")
            .finish_non_exhaustive()
    }
}

impl LookupCoordinator {
    /// Creates a coordinator with caching enabled.
    #[must_use]
    pub fn new(source: Arc<dyn DataSource>, store: Option<TranslationStore>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                source,
                store,
                caching_enabled: AtomicBool::new(true),
                in_flight: Mutex::new(HashMap::new()),
                write_backs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 設定からデータソースとキャッシュを構築する
    ///
    /// 相対パスは `root` を基準に解決します。
    ///
    /// # Errors
    /// データディレクトリのマニフェストが読み込めない場合
    pub async fn from_settings(
        settings: &LocationsSettings,
        root: &Path,
    ) -> Result<Self, SourceError> {
        let source = JsonDataDir::open(root.join(&settings.data_dir)).await?;

        let store = match settings.cache.backend {
            CacheBackend::Memory => Some(TranslationStore::with_engine(MemoryEngine::new())),
            CacheBackend::Sqlite => {
                let path = settings
                    .cache
                    .database_path
                    .as_ref()
                    .map(|path| root.join(path))
                    .or_else(SqliteEngine::default_path);
                match path {
                    Some(path) => {
                        prepare_cache_dir(&path).await;
                        Some(TranslationStore::with_engine(SqliteEngine::new(path)))
                    }
                    None => {
                        tracing::debug!("No cache directory on this platform, caching disabled");
                        None
                    }
                }
            }
        };

        let coordinator = Self::new(Arc::new(source), store);
        coordinator.set_caching_enabled(settings.cache.enabled);
        Ok(coordinator)
    }

    pub fn set_caching_enabled(&self, enabled: bool) {
        self.inner.caching_enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_caching_enabled(&self) -> bool {
        self.inner.caching_enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn store(&self) -> Option<&TranslationStore> {
        self.inner.store.as_ref()
    }

    /// Known countries, in manifest order.
    #[must_use]
    pub fn get_all_countries(&self) -> Vec<String> {
        self.inner.source.countries().to_vec()
    }

    /// 国の翻訳データを取得する
    ///
    /// 同じ国の読み込みが進行中であれば、その結果を共有します。
    ///
    /// # Errors
    /// - [`LookupError::NotFound`]: 未知の国名（キャッシュにもデータソースにも触れない）
    /// - [`LookupError::Load`]: データソースからの読み込みに失敗
    pub async fn get_country_data(&self, country: &str) -> Result<Arc<LocationRecord>, LookupError> {
        if !self.inner.source.contains(country) {
            return Err(LookupError::NotFound(country.to_string()));
        }

        let load = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(load) = in_flight.get(country) {
                tracing::debug!(country, "Joining in-flight load");
                load.clone()
            } else {
                let load = Self::start_load(&self.inner, country);
                in_flight.insert(country.to_string(), load.clone());
                load
            }
        };

        load.await
    }

    /// 読み込みタスクを起動し、共有可能な Future を返す
    ///
    /// タスクは完了時に自身を `in_flight` から取り除く。
    fn start_load(inner: &Arc<CoordinatorInner>, country: &str) -> SharedLoad {
        let task = {
            let inner = Arc::clone(inner);
            let country = country.to_string();
            tokio::spawn(async move {
                let result = inner.resolve(&country).await;
                inner.in_flight.lock().await.remove(&country);
                result
            })
        };

        let inner = Arc::clone(inner);
        let country = country.to_string();
        async move {
            match task.await {
                Ok(result) => result,
                Err(error) => {
                    inner.in_flight.lock().await.remove(&country);
                    Err(LookupError::Interrupted { country, reason: error.to_string() })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Resolves a country / province / city path to its translated name.
    ///
    /// Returns `Ok(None)` when the province or city is not part of the record.
    ///
    /// # Errors
    /// Same as [`Self::get_country_data`] for the path's country.
    pub async fn translate(&self, path: &LocationPath) -> Result<Option<String>, LookupError> {
        let record = self.get_country_data(&path.country).await?;
        Ok(record.translation_at(path).map(str::to_string))
    }

    /// Loads each country in turn. A failure does not stop the batch.
    pub async fn preload_countries<S: AsRef<str>>(&self, countries: &[S]) -> PreloadReport {
        let mut report = PreloadReport::default();
        for country in countries {
            let country = country.as_ref();
            match self.get_country_data(country).await {
                Ok(_) => report.succeeded.push(country.to_string()),
                Err(error) => {
                    tracing::warn!(country, %error, "Preload failed");
                    report.failed.push(country.to_string());
                }
            }
        }
        report
    }

    /// Empties the cache's records. `false` without a usable store.
    pub async fn clear_translation_cache(&self) -> bool {
        match &self.inner.store {
            Some(store) => store.clear().await,
            None => false,
        }
    }

    /// Deletes and recreates the cache database. `false` without a usable store.
    pub async fn clear_all_cache(&self) -> bool {
        match &self.inner.store {
            Some(store) => store.destroy_and_recreate().await,
            None => false,
        }
    }

    pub async fn close_cache(&self) {
        if let Some(store) = &self.inner.store {
            store.close().await;
        }
    }

    #[must_use]
    pub const fn cache_version_info(&self) -> &'static str {
        CURRENT_VERSION
    }

    /// Waits for every background cache write scheduled so far.
    pub async fn flush_write_backs(&self) {
        let pending = std::mem::take(&mut *self.inner.write_backs.lock().await);
        for handle in pending {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "Background cache write task failed");
            }
        }
    }

    /// Flushes background writes and closes the cache.
    pub async fn shutdown(&self) {
        self.flush_write_backs().await;
        self.close_cache().await;
    }
}

impl CoordinatorInner {
    /// キャッシュが有効かつ利用可能な場合のみストアを返す
    fn active_store(&self) -> Option<TranslationStore> {
        if !self.caching_enabled.load(Ordering::SeqCst) {
            return None;
        }
        self.store.as_ref().filter(|store| store.is_available()).cloned()
    }

    /// キャッシュを確認し、なければデータソースから読み込む
    async fn resolve(&self, country: &str) -> Result<Arc<LocationRecord>, LookupError> {
        let store = self.active_store();

        if let Some(store) = &store {
            if let Some(record) = store.get(country).await {
                tracing::debug!(country, "Cache hit");
                return Ok(Arc::new(record));
            }
            tracing::debug!(country, "Cache miss");
        }

        let record = self.source.load(country).await.map_err(|source| LookupError::Load {
            country: country.to_string(),
            source: Arc::new(source),
        })?;
        let record = Arc::new(record);

        if let Some(store) = store {
            self.schedule_write_back(store, country, Arc::clone(&record)).await;
        }
        Ok(record)
    }

    /// キャッシュへの書き込みをバックグラウンドで開始する
    async fn schedule_write_back(
        &self,
        store: TranslationStore,
        country: &str,
        record: Arc<LocationRecord>,
    ) {
        let country = country.to_string();
        let handle = tokio::spawn(async move {
            if store.put(&country, &record).await {
                tracing::debug!(country, "Cached country data");
            } else {
                tracing::warn!(country, "Background cache write failed");
            }
        });
        let mut write_backs = self.write_backs.lock().await;
        write_backs.retain(|handle| !handle.is_finished());
        write_backs.push(handle);
    }
}

/// SQLite ファイルの親ディレクトリを作成する（失敗してもキャッシュなしで動作する）
async fn prepare_cache_dir(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if parent.as_os_str().is_empty() {
        return;
    }
    if let Err(error) = tokio::fs::create_dir_all(parent).await {
        tracing::debug!(path = %parent.display(), %error, "Failed to create cache directory");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use googletest::prelude::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::MemorySource;
    use crate::test_utils::{
        sample_record,
        sample_source,
    };

    fn coordinator(source: &Arc<MemorySource>, engine: &MemoryEngine) -> LookupCoordinator {
        LookupCoordinator::new(
            Arc::clone(source) as Arc<dyn DataSource>,
            Some(TranslationStore::with_engine(engine.clone())),
        )
    }

    #[tokio::test]
    async fn miss_loads_and_writes_back() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);

        let record = lookup.get_country_data("Japan").await.unwrap();
        lookup.flush_write_backs().await;

        assert_eq!(*record, sample_record("Japan"));
        assert_eq!(source.load_count("Japan").await, 1);
        assert_eq!(engine.stored_ids().await, vec!["Japan".to_string()]);
    }

    #[tokio::test]
    async fn hit_skips_load_and_write_back() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);
        lookup.get_country_data("Japan").await.unwrap();
        lookup.flush_write_backs().await;

        let record = lookup.get_country_data("Japan").await.unwrap();
        lookup.flush_write_backs().await;

        assert_eq!(*record, sample_record("Japan"));
        assert_eq!(source.load_count("Japan").await, 1);
        assert_eq!(engine.write_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_load() {
        let source = Arc::new(sample_source().with_delay(Duration::from_millis(20)));
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);

        let results =
            futures::future::join_all((0..10).map(|_| lookup.get_country_data("Australia"))).await;
        lookup.flush_write_backs().await;

        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|result| Arc::ptr_eq(result.as_ref().unwrap(), first)));
        assert_eq!(source.load_count("Australia").await, 1);
        assert!(engine.write_count() <= 1);
    }

    #[tokio::test]
    async fn unknown_country_touches_nothing() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);

        let result = lookup.get_country_data("Atlantis").await;

        assert!(matches!(result, Err(LookupError::NotFound(ref name)) if name == "Atlantis"));
        assert_eq!(source.total_loads(), 0);
        assert_eq!(engine.connect_count(), 0);
    }

    #[tokio::test]
    async fn load_failure_is_shared_and_not_cached() {
        let source = Arc::new(sample_source().with_unloadable("Atlantis"));
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);

        let (a, b) =
            tokio::join!(lookup.get_country_data("Atlantis"), lookup.get_country_data("Atlantis"));

        assert!(matches!(a, Err(LookupError::Load { .. })));
        assert!(matches!(b, Err(LookupError::Load { .. })));

        // 失敗後は新しい読み込みが始まる
        let _ = lookup.get_country_data("Atlantis").await;
        assert!(source.load_count("Atlantis").await >= 2);
        lookup.flush_write_backs().await;
        assert_eq!(engine.write_count(), 0);
    }

    #[googletest::test]
    #[tokio::test]
    async fn disabled_caching_never_touches_store() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new();
        let lookup = coordinator(&source, &engine);
        lookup.set_caching_enabled(false);

        lookup.get_country_data("China").await.unwrap();
        lookup.get_country_data("China").await.unwrap();
        lookup.flush_write_backs().await;

        expect_that!(lookup.is_caching_enabled(), eq(false));
        assert_eq!(source.load_count("China").await, 2);
        assert_eq!(engine.connect_count(), 0);
    }

    #[tokio::test]
    async fn write_back_failure_does_not_affect_caller() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new();
        engine.fail_writes(true);
        let lookup = coordinator(&source, &engine);

        let record = lookup.get_country_data("Japan").await.unwrap();
        lookup.flush_write_backs().await;

        assert_eq!(*record, sample_record("Japan"));
        assert!(engine.stored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn write_back_outlives_dropped_coordinator() {
        let source = Arc::new(sample_source());
        let engine = MemoryEngine::new().with_write_delay(Duration::from_millis(20));
        let lookup = coordinator(&source, &engine);

        lookup.get_country_data("Japan").await.unwrap();
        drop(lookup);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.stored_ids().await, vec!["Japan".to_string()]);
        assert_eq!(engine.write_count(), 1);
    }

    #[tokio::test]
    async fn works_without_store() {
        let source = Arc::new(sample_source());
        let lookup = LookupCoordinator::new(Arc::clone(&source) as Arc<dyn DataSource>, None);

        assert!(lookup.get_country_data("Japan").await.is_ok());
        assert!(!lookup.clear_translation_cache().await);
        assert!(!lookup.clear_all_cache().await);
        lookup.shutdown().await;
    }

    #[tokio::test]
    async fn translate_resolves_each_level() {
        let source = Arc::new(sample_source());
        let lookup = LookupCoordinator::new(Arc::clone(&source) as Arc<dyn DataSource>, None);

        let country = lookup.translate(&LocationPath::country("Australia")).await.unwrap();
        let city = lookup
            .translate(&LocationPath::city("Australia", "Queensland", "Brisbane"))
            .await
            .unwrap();
        let unknown_city =
            lookup.translate(&LocationPath::city("Australia", "Queensland", "Nowhere")).await.unwrap();

        assert_eq!(country.as_deref(), Some("澳大利亚"));
        assert_eq!(city.as_deref(), Some("布里斯班"));
        assert_eq!(unknown_city, None);
    }

    #[tokio::test]
    async fn preload_keeps_request_order() {
        let source = Arc::new(sample_source());
        let lookup = LookupCoordinator::new(Arc::clone(&source) as Arc<dyn DataSource>, None);

        let report = lookup.preload_countries(&["Japan", "Atlantis", "China"]).await;

        assert_eq!(
            report,
            PreloadReport {
                succeeded: vec!["Japan".to_string(), "China".to_string()],
                failed: vec!["Atlantis".to_string()],
            }
        );
    }

    #[googletest::test]
    fn reports_countries_and_version() {
        let source = Arc::new(sample_source());
        let lookup = LookupCoordinator::new(source, None);

        assert_eq!(lookup.get_all_countries(), vec!["Australia", "China", "Japan"]);
        expect_that!(lookup.cache_version_info(), eq("1.0.9"));
    }
}
