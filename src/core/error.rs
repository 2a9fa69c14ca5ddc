//! Error taxonomy shared by the index, the ingestion pipeline and the query engine

use thiserror::Error;

use crate::search::metric::DistanceMetric;

/// Errors raised by the search core
#[derive(Debug, Error)]
pub enum SearchError {
    /// Bad caller input (empty query, `n_results` out of range)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The embedder could not produce a vector for the given text
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Embedder and index disagree on vector dimension
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index was created with a different distance metric
    #[error("Metric mismatch: index uses {stored}, requested {requested}")]
    MetricMismatch {
        stored: DistanceMetric,
        requested: DistanceMetric,
    },

    /// Storage backend unreachable or corrupt
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        Self::Embedding(msg.into())
    }

    /// HTTP-style status class for the boundary layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::IndexUnavailable(_) => 503,
            Self::Embedding(_)
            | Self::DimensionMismatch { .. }
            | Self::MetricMismatch { .. }
            | Self::Io(_)
            | Self::Json(_) => 500,
        }
    }

    /// Whether the error can never be recovered from by retrying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::MetricMismatch { .. } | Self::IndexUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(err: rusqlite::Error) -> Self {
        Self::IndexUnavailable(err.to_string())
    }
}
