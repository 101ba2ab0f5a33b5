//! 翻訳データの読み込み元
//!
//! 国ごとの翻訳データを提供する [`DataSource`] と、その実装を定義します。

pub(crate) mod json_dir;
mod memory;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use json_dir::{
    JsonDataDir,
    MANIFEST_FILE,
};
pub use memory::MemorySource;

use crate::types::LocationRecord;

/// Errors raised while loading a country's data.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no data available for '{0}'")]
    Missing(String),

    #[error("data for '{requested}' describes '{found}'")]
    Mismatch { requested: String, found: String },
}

/// A set of known countries and a way to load each one's record.
#[async_trait]
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Known countries, in a stable order.
    fn countries(&self) -> &[String];

    fn contains(&self, country: &str) -> bool {
        self.countries().iter().any(|known| known == country)
    }

    /// Loads the record for a known country.
    async fn load(&self, country: &str) -> Result<LocationRecord, SourceError>;
}

/// Replaces every character outside `[A-Za-z0-9]` with `_`.
///
/// Used to derive data file names from country and province names.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("Japan", "Japan")]
    #[case::space("United States", "United_States")]
    #[case::punctuation("Cote D'ivoire", "Cote_D_ivoire")]
    #[case::digits("Area 51", "Area_51")]
    #[case::non_ascii("Åland", "_land")]
    #[case::empty("", "")]
    fn test_sanitize_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_name(input), expected);
    }
}
