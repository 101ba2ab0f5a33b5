use std::path::PathBuf;

use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error in '{field_path}': {message}")]
pub struct ValidationError {
    /// JSON path to the field (e.g., "preload[0]")
    pub field_path: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field_path: field_path.into(), message: message.into() }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    ValidationErrors(Vec<ValidationError>),

    #[error("Failed to load configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, err)| format!("  {}. {} - {}", i + 1, err.field_path, err.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationsSettings {
    /// Data directory with `countries.json` and one file per country.
    /// Relative paths are resolved against the project root.
    pub data_dir: PathBuf,

    pub cache: CacheConfig,

    /// Countries loaded (and cached) by `locations-zh preload` without arguments.
    pub preload: Vec<String>,
}

impl Default for LocationsSettings {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("data"), cache: CacheConfig::default(), preload: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    /// SQLite database file. `None` uses the user cache directory.
    pub database_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, backend: CacheBackend::default(), database_path: None }
    }
}

/// Storage engine behind the translation cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Sqlite,
    /// Process-local; nothing survives the process.
    Memory,
}

impl LocationsSettings {
    /// # Errors
    /// - Empty data directory or database path
    /// - Empty preload entry
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "dataDir",
                "The directory cannot be empty. Example: \"data\"",
            ));
        }

        if let Some(path) = &self.cache.database_path
            && path.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "cache.databasePath",
                "The path cannot be empty. Remove this field to use the default cache directory",
            ));
        }

        if self.cache.database_path.is_some() && self.cache.backend == CacheBackend::Memory {
            errors.push(ValidationError::new(
                "cache.databasePath",
                "A database path requires the \"sqlite\" backend",
            ));
        }

        for (index, country) in self.preload.iter().enumerate() {
            if country.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("preload[{index}]"),
                    "The country name cannot be empty",
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::expect_used, clippy::panic)]
mod tests {
    use googletest::prelude::*;
    use rstest::*;

    use super::*;

    #[rstest]
    fn validate_valid_settings() {
        let settings = LocationsSettings::default();

        assert_that!(settings.validate(), ok(anything()));
    }

    #[rstest]
    fn deserialize_empty_settings() {
        let settings: LocationsSettings = serde_json::from_str("{}").unwrap();

        assert_eq!(settings, LocationsSettings::default());
        assert_that!(settings.cache.enabled, eq(true));
        assert_that!(settings.cache.backend, eq(CacheBackend::Sqlite));
    }

    #[rstest]
    fn deserialize_partial_settings() {
        let json = r#"{"cache": {"backend": "memory"}, "preload": ["Japan"]}"#;

        let settings: LocationsSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_that!(settings.cache.enabled, eq(true));
        assert_that!(settings.cache.backend, eq(CacheBackend::Memory));
        assert_that!(settings.preload, elements_are![eq("Japan")]);
    }

    #[rstest]
    fn deserialize_rejects_unknown_backend() {
        let json = r#"{"cache": {"backend": "indexeddb"}}"#;

        let result = serde_json::from_str::<LocationsSettings>(json);

        assert!(result.is_err());
    }

    #[rstest]
    fn validate_invalid_data_dir_empty() {
        let settings = LocationsSettings { data_dir: PathBuf::new(), ..LocationsSettings::default() };
        let result = settings.validate();

        assert_that!(
            result,
            err(elements_are![all![
                field!(ValidationError.field_path, eq("dataDir")),
                field!(ValidationError.message, contains_substring("cannot be empty"))
            ]])
        );
    }

    #[rstest]
    fn validate_invalid_database_path_empty() {
        let settings = LocationsSettings {
            cache: CacheConfig { database_path: Some(PathBuf::new()), ..CacheConfig::default() },
            ..LocationsSettings::default()
        };
        let result = settings.validate();

        assert_that!(
            result,
            err(elements_are![all![
                field!(ValidationError.field_path, eq("cache.databasePath")),
                field!(ValidationError.message, contains_substring("cannot be empty"))
            ]])
        );
    }

    #[rstest]
    fn validate_database_path_with_memory_backend() {
        let settings = LocationsSettings {
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                database_path: Some(PathBuf::from("cache.db")),
                ..CacheConfig::default()
            },
            ..LocationsSettings::default()
        };
        let result = settings.validate();

        assert_that!(
            result,
            err(elements_are![all![
                field!(ValidationError.field_path, eq("cache.databasePath")),
                field!(ValidationError.message, contains_substring("sqlite"))
            ]])
        );
    }

    #[rstest]
    fn validate_invalid_preload_entry() {
        let settings = LocationsSettings {
            preload: vec!["Japan".to_string(), "  ".to_string()],
            ..LocationsSettings::default()
        };
        let result = settings.validate();

        assert_that!(
            result,
            err(elements_are![all![
                field!(ValidationError.field_path, eq("preload[1]")),
                field!(ValidationError.message, contains_substring("cannot be empty"))
            ]])
        );
    }

    #[rstest]
    fn config_error_validation_errors_format() {
        let settings = LocationsSettings {
            data_dir: PathBuf::new(),
            preload: vec![String::new()],
            ..LocationsSettings::default()
        };

        let errors = settings.validate().unwrap_err();
        let config_error = ConfigError::ValidationErrors(errors);

        let error_message = format!("{config_error}");
        assert_that!(error_message, contains_substring("Configuration validation failed"));
        assert_that!(error_message, contains_substring("1. dataDir"));
        assert_that!(error_message, contains_substring("2. preload[0]"));
    }
}
