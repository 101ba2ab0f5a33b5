//! 翻訳データディレクトリのビルド
//!
//! 位置情報 CSV から国 → 省 → 市のツリーを作り、国ごとの JSON ファイルと
//! マニフェストを出力します。

mod emit;
mod ingest;

use std::fmt;
use std::fs::File;
use std::path::{
    Path,
    PathBuf,
};

pub use emit::write_data_dir;
pub use ingest::{
    LocationTree,
    fold_records,
    merge_existing,
    read_location_tree,
};
use thiserror::Error;

use crate::source::SourceError;
use crate::types::LocationRecord;

/// ビルド処理のエラー
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read existing data: {0}")]
    Existing(#[from] SourceError),

    #[error("'{first}' and '{second}' would both be written to {file}")]
    NameCollision { first: String, second: String, file: String },

    #[error("'{country}' would be written to {file}, which is reserved for the manifest")]
    ReservedName { country: String, file: String },
}

/// Counts of a built data set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub countries: usize,
    pub provinces: usize,
    pub cities: usize,
}

impl BuildStats {
    #[must_use]
    pub fn of(records: &[LocationRecord]) -> Self {
        Self {
            countries: records.len(),
            provinces: records.iter().map(|record| record.provinces.len()).sum(),
            cities: records.iter().map(LocationRecord::city_count).sum(),
        }
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} countries, {} provinces, {} cities", self.countries, self.provinces, self.cities)
    }
}

/// CSV から データディレクトリを生成する
///
/// `keep_existing` が真の場合、出力先に既にある空でない翻訳を引き継ぎます。
///
/// # Errors
/// CSV の読み込み、既存データの読み込み、または書き込みに失敗した場合
pub fn build_data_dir(
    csv_path: &Path,
    out_dir: &Path,
    keep_existing: bool,
) -> Result<BuildStats, BuildError> {
    tracing::info!(input = %csv_path.display(), "Reading location CSV");
    let file = File::open(csv_path)
        .map_err(|source| BuildError::Io { path: csv_path.to_path_buf(), source })?;
    let tree = read_location_tree(file)?;

    let mut records = fold_records(&tree);
    if keep_existing {
        let kept = merge_existing(&mut records, out_dir)?;
        tracing::info!(kept, "Carried over existing translations");
    }

    let stats = write_data_dir(&records, out_dir)?;
    tracing::info!(output = %out_dir.display(), %stats, "Data directory written");
    Ok(stats)
}
