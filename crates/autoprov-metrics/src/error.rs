//! Metrics store error types.

use thiserror::Error;

/// Errors returned when reading or writing demand counts.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("count query failed: {0}")]
    Query(String),

    #[error("state store error: {0}")]
    State(#[from] autoprov_state::StateError),
}

pub type MetricsResult<T> = Result<T, MetricsError>;
