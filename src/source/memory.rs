//! メモリ上の翻訳データ

use std::collections::HashMap;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    DataSource,
    SourceError,
};
use crate::types::LocationRecord;

/// [`DataSource`] serving records held in memory.
///
/// Counts loads per country and can delay each load, which makes it the
/// source of choice for exercising the lookup coordinator.
#[derive(Debug, Default)]
pub struct MemorySource {
    /// Known countries in insertion order
    countries: Vec<String>,
    /// Country → record; listed countries without a record fail to load
    records: HashMap<String, LocationRecord>,
    /// Artificial latency per load
    delay: Option<Duration>,
    /// Country → number of `load` calls
    loads: Mutex<HashMap<String, usize>>,
    /// Total number of `load` calls
    total_loads: AtomicUsize,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a source listing every record, in iteration order.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = LocationRecord>) -> Self {
        records.into_iter().fold(Self::new(), Self::with_record)
    }

    /// Adds (or replaces) a record.
    #[must_use]
    pub fn with_record(mut self, record: LocationRecord) -> Self {
        if !self.countries.contains(&record.country) {
            self.countries.push(record.country.clone());
        }
        self.records.insert(record.country.clone(), record);
        self
    }

    /// Lists a country whose data cannot be loaded.
    #[must_use]
    pub fn with_unloadable(mut self, country: impl Into<String>) -> Self {
        let country = country.into();
        if !self.countries.contains(&country) {
            self.countries.push(country);
        }
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of loads issued for `country`.
    pub async fn load_count(&self, country: &str) -> usize {
        self.loads.lock().await.get(country).copied().unwrap_or_default()
    }

    /// Number of loads issued for any country.
    pub fn total_loads(&self) -> usize {
        self.total_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn countries(&self) -> &[String] {
        &self.countries
    }

    async fn load(&self, country: &str) -> Result<LocationRecord, SourceError> {
        self.total_loads.fetch_add(1, Ordering::SeqCst);
        *self.loads.lock().await.entry(country.to_string()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.records.get(country).cloned().ok_or_else(|| SourceError::Missing(country.to_string()))
    }
}
