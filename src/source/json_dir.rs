//! JSON データディレクトリ
//!
//! ```text
//! data/
//! ├── countries.json      # ["Australia", "China", ...]
//! ├── Australia.json      # LocationRecord
//! └── United_States.json
//! ```

use std::io;
use std::path::{
    Path,
    PathBuf,
};

use async_trait::async_trait;

use super::{
    DataSource,
    SourceError,
    sanitize_name,
};
use crate::types::LocationRecord;

/// Manifest listing the known countries.
pub const MANIFEST_FILE: &str = "countries.json";

/// Data directory produced by `build::write_data_dir`.
#[derive(Debug, Clone)]
pub struct JsonDataDir {
    /// Directory root
    dir: PathBuf,
    /// Countries from the manifest, in file order
    countries: Vec<String>,
}

impl JsonDataDir {
    /// マニフェストを読み込んでデータディレクトリを開く
    ///
    /// # Errors
    /// - マニフェストの読み込みエラー
    /// - JSON パースエラー
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let dir = dir.into();
        let manifest = dir.join(MANIFEST_FILE);
        tracing::debug!(path = %manifest.display(), "Reading country manifest");

        let content = tokio::fs::read_to_string(&manifest)
            .await
            .map_err(|source| SourceError::Io { path: manifest.clone(), source })?;
        let countries: Vec<String> = serde_json::from_str(&content)
            .map_err(|source| SourceError::Parse { path: manifest, source })?;

        Ok(Self { dir, countries })
    }

    /// Path of the data file for `country`.
    #[must_use]
    pub fn record_path(&self, country: &str) -> PathBuf {
        record_path(&self.dir, country)
    }
}

/// `<dir>/<sanitized country>.json`
pub(crate) fn record_path(dir: &Path, country: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize_name(country)))
}

/// 翻訳データファイルをパースし、国名を検証する
pub(crate) fn parse_record(
    path: &Path,
    country: &str,
    content: &str,
) -> Result<LocationRecord, SourceError> {
    let record: LocationRecord = serde_json::from_str(content)
        .map_err(|source| SourceError::Parse { path: path.to_path_buf(), source })?;
    if record.country != country {
        return Err(SourceError::Mismatch {
            requested: country.to_string(),
            found: record.country,
        });
    }
    Ok(record)
}

#[async_trait]
impl DataSource for JsonDataDir {
    fn countries(&self) -> &[String] {
        &self.countries
    }

    async fn load(&self, country: &str) -> Result<LocationRecord, SourceError> {
        if !self.contains(country) {
            return Err(SourceError::Missing(country.to_string()));
        }

        let path = self.record_path(country);
        tracing::debug!(country, path = %path.display(), "Loading country data");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::Missing(country.to_string()));
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };

        parse_record(&path, country, &content)
    }
}
