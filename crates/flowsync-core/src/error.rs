use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously by [`crate::merge::merge`]. Both signal a
/// producer bug and are never absorbed by the merger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("invalid merge input: {reason}")]
    InvalidMergeInput { reason: &'static str },

    #[error("merge depth limit of {max_depth} exceeded at `{path}`")]
    MaxDepthExceeded { path: String, max_depth: usize },
}

impl MergeError {
    pub fn invalid_input(reason: &'static str) -> Self {
        Self::InvalidMergeInput { reason }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
