//! Core types used throughout the project.

use std::collections::HashMap;
use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};

/// Translations for a single country.
///
/// Translated names default to an empty string and `provinces` is always
/// present (possibly empty), even when the data file omits them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub country: String,
    #[serde(default)]
    pub translated_name: String,
    #[serde(default)]
    pub provinces: HashMap<String, ProvinceRecord>,
}

/// Translations for a province and its cities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvinceRecord {
    #[serde(default)]
    pub translated_name: String,
    /// City name → translated name
    #[serde(default)]
    pub cities: HashMap<String, String>,
}

impl LocationRecord {
    /// 空の翻訳を持つ国レコードを作成
    #[must_use]
    pub fn new(country: impl Into<String>) -> Self {
        Self { country: country.into(), translated_name: String::new(), provinces: HashMap::new() }
    }

    #[must_use]
    pub fn province(&self, name: &str) -> Option<&ProvinceRecord> {
        self.provinces.get(name)
    }

    /// Province names in sorted order.
    #[must_use]
    pub fn province_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.provinces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of cities across all provinces.
    #[must_use]
    pub fn city_count(&self) -> usize {
        self.provinces.values().map(|province| province.cities.len()).sum()
    }

    /// Resolves a path within this record to its translated name.
    ///
    /// The path's country is not compared; callers pick the record by country.
    #[must_use]
    pub fn translation_at(&self, path: &LocationPath) -> Option<&str> {
        let Some(province_name) = &path.province else {
            return Some(&self.translated_name);
        };
        let province = self.provinces.get(province_name)?;
        match &path.city {
            Some(city) => province.cities.get(city).map(String::as_str),
            None => Some(&province.translated_name),
        }
    }
}

impl ProvinceRecord {
    /// City names in sorted order.
    #[must_use]
    pub fn city_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A lookup key path: country, optionally narrowed to a province and a city.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationPath {
    pub country: String,
    pub province: Option<String>,
    pub city: Option<String>,
}

impl LocationPath {
    #[must_use]
    pub fn country(country: impl Into<String>) -> Self {
        Self { country: country.into(), province: None, city: None }
    }

    #[must_use]
    pub fn province(country: impl Into<String>, province: impl Into<String>) -> Self {
        Self { country: country.into(), province: Some(province.into()), city: None }
    }

    #[must_use]
    pub fn city(
        country: impl Into<String>,
        province: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self { country: country.into(), province: Some(province.into()), city: Some(city.into()) }
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.country)?;
        if let Some(province) = &self.province {
            write!(f, " / {province}")?;
        }
        if let Some(city) = &self.city {
            write!(f, " / {city}")?;
        }
        Ok(())
    }
}

/// キャッシュに永続化されるエントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 主キー（国名と同じ）
    pub id: String,
    pub country: String,
    /// `store::codec` でエンコードされた `LocationRecord`
    pub data: serde_json::Value,
    /// 書き込み時刻（UNIX エポックからのミリ秒）
    pub timestamp: i64,
}

/// メタデータ領域に保存されるバージョンタグ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTag {
    pub key: String,
    pub value: String,
}

impl VersionTag {
    /// Metadata key under which the tag is stored.
    pub const KEY: &'static str = "version";

    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self { key: Self::KEY.to_string(), value: value.into() }
    }
}
