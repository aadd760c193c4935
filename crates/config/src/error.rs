use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading and watching errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(PathBuf),

    #[error("config invalid: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
