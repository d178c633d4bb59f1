//! Error types for the count store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open count store: {0}")]
    Open(String),

    #[error("count store transaction failed: {0}")]
    Transaction(String),

    #[error("count store table unavailable: {0}")]
    Table(String),

    #[error("count store read failed: {0}")]
    Read(String),

    #[error("count store write failed: {0}")]
    Write(String),

    #[error("failed to encode {kind} record: {reason}")]
    Encode { kind: &'static str, reason: String },

    /// A stored value no longer decodes, e.g. after a format change.
    #[error("corrupt {kind} record at {key}: {reason}")]
    Corrupt {
        kind: &'static str,
        key: String,
        reason: String,
    },
}
