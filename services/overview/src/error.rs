//! Error types for the overview service

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverviewError {
    #[error("Upstream {provider} error: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Server error: {message}")]
    Server { message: String },
}

impl OverviewError {
    /// Tag an upstream client failure with the provider it came from.
    pub fn upstream(provider: &'static str, err: impl std::fmt::Display) -> Self {
        OverviewError::Upstream {
            provider,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OverviewError>;
