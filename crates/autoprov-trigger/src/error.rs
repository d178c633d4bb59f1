//! Trigger sink error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("app instance already exists: {0}")]
    AlreadyExists(String),

    #[error("app instance not found: {0}")]
    NotFound(String),

    #[error("trigger sink unavailable: {0}")]
    Unavailable(String),

    #[error("cluster instance not found: {0}")]
    ClusterNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] autoprov_state::StateError),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
