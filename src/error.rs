//! Error types for descent.

use thiserror::Error;

/// Errors that can occur while building or querying an index.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescentError {
    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Metric name not present in the registry.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// Dimension mismatch between query and indexed points.
    #[error("dimension mismatch: query has {query_dim} dimensions, index has {index_dim}")]
    DimensionMismatch { query_dim: usize, index_dim: usize },

    /// Empty index (no points).
    #[error("index is empty")]
    EmptyIndex,

    /// Build halted by an external cancellation signal.
    #[error("build cancelled")]
    Cancelled,
}

/// Result type alias for descent operations.
pub type Result<T> = std::result::Result<T, DescentError>;
