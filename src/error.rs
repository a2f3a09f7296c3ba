use thiserror::Error;

use crate::decision::PairingId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty item set, too few players, duplicate ids, or a decision naming a stranger
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A submission that does not match the current phase, e.g. a double submission
    /// after a resume
    #[error("stale state: {0}")]
    StaleState(String),
    /// The decision source could not answer; nothing was mutated
    #[error("no decision available for pairing {pairing}: {reason}")]
    DecisionUnavailable { pairing: PairingId, reason: String },
    /// The snapshot write failed, so the step was not applied
    #[error("snapshot write failed: {0}")]
    Persistence(#[from] PersistenceError),
    /// A snapshot could not be restored (wrong kind, unknown version, stale sequence)
    #[error("snapshot rejected: {0}")]
    Snapshot(String),
    #[error("engine has been abandoned")]
    Abandoned,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Returned by a [`crate::DecisionSource`] that cannot produce an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DecisionUnavailable {
    pub reason: String,
}

impl DecisionUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A row rejected during ingestion. The rest of the batch is still loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct MalformedRow {
    pub line: usize,
    pub reason: String,
}
