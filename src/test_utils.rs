//! テスト用ユーティリティ関数
//!
//! 複数のテストモジュールで使用される共通のヘルパー関数を提供します。
#![cfg(test)]

use crate::source::MemorySource;
use crate::types::{
    LocationRecord,
    ProvinceRecord,
};

/// テスト用の `ProvinceRecord` を作成する
pub(crate) fn province(translated_name: &str, cities: &[(&str, &str)]) -> ProvinceRecord {
    ProvinceRecord {
        translated_name: translated_name.to_string(),
        cities: cities.iter().map(|(city, name)| ((*city).to_string(), (*name).to_string())).collect(),
    }
}

/// 国名ごとに決まった内容のレコードを返す
///
/// 既知の国（Australia / China / Japan）以外は空のレコードになります。
pub(crate) fn sample_record(country: &str) -> LocationRecord {
    let mut record = LocationRecord::new(country);
    match country {
        "Australia" => {
            record.translated_name = "澳大利亚".to_string();
            record.provinces.insert(
                "Queensland".to_string(),
                province("昆士兰州", &[("Brisbane", "布里斯班"), ("Gold Coast", "")]),
            );
            record.provinces.insert("Victoria".to_string(), province("", &[("Melbourne", "")]));
        }
        "China" => {
            record.translated_name = "中国".to_string();
            record.provinces.insert("Beijing".to_string(), province("北京", &[("Beijing", "北京")]));
        }
        "Japan" => {
            record.translated_name = "日本".to_string();
            record.provinces.insert(
                "Tokyo".to_string(),
                province("东京都", &[("Shinjuku", ""), ("Shibuya", "涩谷")]),
            );
        }
        _ => {}
    }
    record
}

/// Australia / China / Japan を持つ `MemorySource`
pub(crate) fn sample_source() -> MemorySource {
    MemorySource::from_records(["Australia", "China", "Japan"].map(sample_record))
}
