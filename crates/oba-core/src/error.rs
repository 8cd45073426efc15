use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not initialized: no config at {0} (run 'oba init')")]
    NotInitialized(PathBuf),

    #[error("already initialized: {0} exists (pass --force to overwrite)")]
    AlreadyInitialized(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("home directory not found: set HOME or pass --root")]
    HomeNotFound,

    #[error("preference '{key}' has an unexpected shape: {message}")]
    Preference { key: String, message: String },

    #[error(transparent)]
    Network(#[from] oba_network::NetworkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
