//! CSV の読み込みとツリーの構築

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::io::{
    self,
    Read,
};
use std::path::Path;

use super::BuildError;
use crate::source::json_dir::{
    parse_record,
    record_path,
};
use crate::types::{
    LocationRecord,
    ProvinceRecord,
};

/// Country → province → sorted, de-duplicated cities.
pub type LocationTree = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Zero-based CSV columns holding the country, province and city names.
const COUNTRY_COLUMN: usize = 3;
const PROVINCE_COLUMN: usize = 4;
const CITY_COLUMN: usize = 5;

/// 位置情報 CSV（ヘッダーなし）からツリーを構築する
///
/// 値は前後の空白を除去し、国・省・市のいずれかが空の行は読み飛ばします。
///
/// # Errors
/// CSV として読み込めない場合
pub fn read_location_tree<R: Read>(reader: R) -> Result<LocationTree, BuildError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut tree = LocationTree::new();
    let mut skipped = 0_usize;
    for row in csv_reader.records() {
        let row = row?;
        let (Some(country), Some(province), Some(city)) =
            (row.get(COUNTRY_COLUMN), row.get(PROVINCE_COLUMN), row.get(CITY_COLUMN))
        else {
            skipped += 1;
            continue;
        };
        if country.is_empty() || province.is_empty() || city.is_empty() {
            skipped += 1;
            continue;
        }

        tree.entry(country.to_string())
            .or_default()
            .entry(province.to_string())
            .or_default()
            .insert(city.to_string());
    }

    tracing::debug!(countries = tree.len(), skipped, "Folded location rows");
    Ok(tree)
}

/// Turns the tree into records with every translated name empty.
#[must_use]
pub fn fold_records(tree: &LocationTree) -> Vec<LocationRecord> {
    tree.iter()
        .map(|(country, provinces)| {
            let mut record = LocationRecord::new(country.clone());
            record.provinces = provinces
                .iter()
                .map(|(province, cities)| {
                    let cities = cities.iter().map(|city| (city.clone(), String::new())).collect();
                    (province.clone(), ProvinceRecord { translated_name: String::new(), cities })
                })
                .collect();
            record
        })
        .collect()
}

/// 既存のデータディレクトリから空でない翻訳を引き継ぐ
///
/// 新しいレコードに存在する国・省・市の翻訳だけを対象とし、
/// 引き継いだ翻訳の数を返します。
///
/// # Errors
/// 既存のデータファイルが読み込めない、またはパースできない場合
pub fn merge_existing(records: &mut [LocationRecord], dir: &Path) -> Result<usize, BuildError> {
    let mut kept = 0;
    for record in records.iter_mut() {
        let path = record_path(dir, &record.country);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => return Err(BuildError::Io { path, source }),
        };
        let existing = parse_record(&path, &record.country, &content)?;
        kept += carry_over(record, &existing);
    }
    Ok(kept)
}

/// `existing` の空でない翻訳を `record` にコピーし、その数を返す
fn carry_over(record: &mut LocationRecord, existing: &LocationRecord) -> usize {
    let mut kept = 0;
    if !existing.translated_name.is_empty() {
        record.translated_name.clone_from(&existing.translated_name);
        kept += 1;
    }

    for (name, province) in &mut record.provinces {
        let Some(old) = existing.provinces.get(name) else {
            continue;
        };
        if !old.translated_name.is_empty() {
            province.translated_name.clone_from(&old.translated_name);
            kept += 1;
        }
        for (city, translated) in &mut province.cities {
            if let Some(old_city) = old.cities.get(city)
                && !old_city.is_empty()
            {
                translated.clone_from(old_city);
                kept += 1;
            }
        }
    }
    kept
}
