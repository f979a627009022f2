// src/core/config_loader.rs

use crate::models::CiConfig;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why the configuration document could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// The file does not exist.
    #[error("Couldn't find configuration file '{}'", .0.display())]
    NotFound(PathBuf),
    /// The file exists but could not be read.
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid YAML or does not match the schema.
    #[error("Error parsing YAML in '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Reads and parses the configuration document at `path`.
pub fn load_config(path: &Path) -> Result<CiConfig, ConfigLoadError> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConfigLoadError::NotFound(path.to_path_buf()),
        _ => ConfigLoadError::Io {
            path: path.display().to_string(),
            source: e,
        },
    })?;

    let config = parse_config(&content).map_err(|e| ConfigLoadError::Yaml {
        path: path.display().to_string(),
        source: e,
    })?;

    log::debug!(
        "Loaded configuration '{}' (schema version: {})",
        path.display(),
        config.schema_version.as_deref().unwrap_or("unspecified")
    );
    Ok(config)
}

/// Parses a configuration document. An empty document (or one holding only comments)
/// is a valid configuration in which every stage runs zero commands.
pub fn parse_config(content: &str) -> Result<CiConfig, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    if value.is_null() {
        return Ok(CiConfig::default());
    }
    serde_yaml::from_value(value)
}
