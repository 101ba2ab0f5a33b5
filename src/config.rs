//! 設定ファイル `.locations-zh.json` の読み込み
/// Config file loader
mod loader;
/// Configuration manager
mod manager;
/// Configuration types and settings
mod types;

pub use loader::CONFIG_FILE;
pub use manager::ConfigManager;
pub use types::{
    CacheBackend,
    CacheConfig,
    ConfigError,
    LocationsSettings,
    ValidationError,
};
