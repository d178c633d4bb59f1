//! Aggregator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggrError {
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] autoprov_core::TimingError),

    #[error("metrics error: {0}")]
    Metrics(#[from] autoprov_metrics::MetricsError),

    #[error("trigger error: {0}")]
    Trigger(#[from] autoprov_trigger::TriggerError),
}

pub type AggrResult<T> = Result<T, AggrError>;
