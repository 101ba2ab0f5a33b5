//! 設定管理を行うモジュール

use std::path::{
    Path,
    PathBuf,
};

use super::{
    ConfigError,
    LocationsSettings,
    loader,
};

/// 設定管理を行う
#[derive(Default, Debug, Clone)]
pub struct ConfigManager {
    /// 現在の設定
    current_settings: LocationsSettings,

    /// プロジェクトのルートパス
    root: Option<PathBuf>,
}

impl ConfigManager {
    /// 新しい設定マネージャーを作成
    #[must_use]
    pub fn new() -> Self {
        Self { current_settings: LocationsSettings::default(), root: None }
    }

    /// 設定を読み込む
    ///
    /// 設定ファイルがない場合はデフォルト値を使用します。
    ///
    /// # Errors
    /// - ファイル読み込みエラー
    /// - JSON パースエラー
    /// - バリデーションエラー
    pub fn load_settings(&mut self, root: &Path) -> Result<(), ConfigError> {
        tracing::debug!("Loading settings for project: {:?}", root);

        let settings = loader::load_from_root(root)?.map_or_else(LocationsSettings::default, |s| {
            tracing::debug!("Loaded project settings: {:?}", s);
            s
        });

        settings.validate().map_err(ConfigError::ValidationErrors)?;

        self.current_settings = settings;
        self.root = Some(root.to_path_buf());
        tracing::debug!("Settings loaded successfully: {:?}", self.current_settings);

        Ok(())
    }

    /// 現在の設定を取得
    #[must_use]
    pub const fn get_settings(&self) -> &LocationsSettings {
        &self.current_settings
    }

    /// プロジェクトルートを取得（未読み込みならカレントディレクトリ）
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_deref().unwrap_or_else(|| Path::new("."))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::config::CacheBackend;

    /// new: デフォルト値で作成される
    #[rstest]
    fn test_new_creates_default_settings() {
        let manager = ConfigManager::new();

        assert_eq!(manager.get_settings(), &LocationsSettings::default());
        assert_eq!(manager.root(), Path::new("."));
    }

    /// load_settings: 設定ファイルがある場合
    #[rstest]
    fn test_load_settings_with_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_content = r#"{"cache": {"backend": "memory", "enabled": false}}"#;
        fs::write(temp_dir.path().join(".locations-zh.json"), config_content).unwrap();

        let mut manager = ConfigManager::new();
        let result = manager.load_settings(temp_dir.path());

        assert!(result.is_ok());
        assert_eq!(manager.get_settings().cache.backend, CacheBackend::Memory);
        assert!(!manager.get_settings().cache.enabled);
        assert_eq!(manager.root(), temp_dir.path());
    }

    /// load_settings: 設定ファイルがない場合はデフォルト値
    #[rstest]
    fn test_load_settings_without_config_file() {
        let temp_dir = TempDir::new().unwrap();

        let mut manager = ConfigManager::new();
        let result = manager.load_settings(temp_dir.path());

        assert!(result.is_ok());
        assert_eq!(manager.get_settings(), &LocationsSettings::default());
    }

    /// load_settings: 無効な設定ファイルは読み込まない
    #[rstest]
    fn test_load_settings_invalid_config_keeps_previous() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".locations-zh.json"), r#"{"preload": [""]}"#).unwrap();

        let mut manager = ConfigManager::new();
        let result = manager.load_settings(temp_dir.path());

        assert!(matches!(result, Err(ConfigError::ValidationErrors(_))));
        assert_eq!(manager.get_settings(), &LocationsSettings::default());
    }
}
