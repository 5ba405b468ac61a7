use thiserror::Error;

use crate::storage::StoreError;

/// Conditions that abort an operation without changing any state.
///
/// Expected, user-facing refusals (capacity, overlap, permissions) are not errors;
/// they come back as `Outcome::Denied` values.
#[derive(Error, Debug)]
pub enum TerritoryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("World not loaded: {0}")]
    WorldNotLoaded(String),

    #[error("Territory index has not been loaded")]
    IndexNotLoaded,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TerritoryError>;
