//! データディレクトリの書き出し

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{
    BuildError,
    BuildStats,
};
use crate::source::{
    MANIFEST_FILE,
    sanitize_name,
};
use crate::source::json_dir::record_path;
use crate::types::LocationRecord;

/// 国ごとの JSON ファイルとマニフェストを書き出す
///
/// JSON のキーはソートされて出力されるため、同じ入力からは同じファイルが生成されます。
///
/// # Errors
/// - サニタイズ後のファイル名が衝突する国がある場合（何も書き出さない）
/// - 書き込みエラー
pub fn write_data_dir(records: &[LocationRecord], dir: &Path) -> Result<BuildStats, BuildError> {
    check_collisions(records)?;
    fs::create_dir_all(dir).map_err(|source| BuildError::Io { path: dir.to_path_buf(), source })?;

    for record in records {
        let path = record_path(dir, &record.country);
        // Value 経由でキーをソートする
        let content = serde_json::to_string_pretty(&serde_json::to_value(record)?)?;
        fs::write(&path, content).map_err(|source| BuildError::Io { path: path.clone(), source })?;
        tracing::debug!(country = %record.country, path = %path.display(), "Wrote country data");
    }

    let countries: Vec<&str> = records.iter().map(|record| record.country.as_str()).collect();
    let manifest = dir.join(MANIFEST_FILE);
    fs::write(&manifest, serde_json::to_string_pretty(&countries)?)
        .map_err(|source| BuildError::Io { path: manifest, source })?;

    Ok(BuildStats::of(records))
}

/// サニタイズ後の名前が互いに、またマニフェストと衝突しないことを確認する
fn check_collisions(records: &[LocationRecord]) -> Result<(), BuildError> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(records.len());
    for record in records {
        let file = format!("{}.json", sanitize_name(&record.country));
        // 大文字小文字を区別しないファイルシステムでも上書きしない
        if file.eq_ignore_ascii_case(MANIFEST_FILE) {
            return Err(BuildError::ReservedName { country: record.country.clone(), file });
        }
        if let Some(first) = seen.insert(file.clone(), &record.country) {
            return Err(BuildError::NameCollision {
                first: first.to_string(),
                second: record.country.clone(),
                file,
            });
        }
    }
    Ok(())
}
