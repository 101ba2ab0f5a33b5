//! 設定ファイルの読み込み関数

use std::path::Path;

use super::{
    ConfigError,
    LocationsSettings,
};

/// Configuration file name, looked up in the project root.
pub const CONFIG_FILE: &str = ".locations-zh.json";

/// プロジェクトルートから設定を読み込む
///
/// # Returns
/// - `Ok(Some(settings))`: 設定ファイルが見つかり、読み込みに成功
/// - `Ok(None)`: 設定ファイルが見つからない
/// - `Err(ConfigError)`: ファイル読み込みまたはパースエラー
///
/// # Errors
/// - ファイル読み込みエラー
/// - JSON パースエラー
pub(super) fn load_from_root(root: &Path) -> Result<Option<LocationsSettings>, ConfigError> {
    let config_path = root.join(CONFIG_FILE);

    if !config_path.exists() {
        tracing::debug!("Configuration file not found: {:?}", config_path);
        return Ok(None);
    }

    tracing::debug!("Loading configuration from: {:?}", config_path);

    let content = std::fs::read_to_string(&config_path)?;
    let settings: LocationsSettings = serde_json::from_str(&content)?;

    Ok(Some(settings))
}
