use std::path::PathBuf;

use crate::domain::Label;

/// A single operation was rejected; the session carries on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("fingerprint must not be empty")]
    EmptyFingerprint,

    #[error("unknown label '{0}' (expected 'important' or 'junk')")]
    UnknownLabel(String),

    #[error("feature vector built from vocabulary v{actual}, model expects v{expected}")]
    VocabularyMismatch { expected: u64, actual: u64 },

    #[error("feature vector has {actual} entries, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A retrain could not produce a model. The previous model stays active.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("no training examples")]
    Empty,

    #[error("all training examples are labeled {0}; both labels are required")]
    SingleClass(Label),

    #[error("malformed training example: {0}")]
    Malformed(String),

    #[error("could not read the feedback ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Failure to load or save the persisted classifier state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("classifier state at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to encode classifier state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the feedback ledger backends.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger row {seq} is unreadable: {reason}")]
    CorruptRow { seq: u64, reason: String },

    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Failures of the language-model summarization call.
#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("summarizer is not configured (set {0})")]
    NotConfigured(String),

    #[error("summarizer rate limit reached")]
    RateLimited,

    #[error("summarizer rejected the credentials")]
    Auth,

    #[error("network error talking to the summarizer: {0}")]
    Network(String),

    #[error("summarizer returned an unexpected response: {0}")]
    Api(String),
}

/// Soft, per-operation failure of an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("mailbox error: {0}")]
    Mailbox(String),

    #[error("mailbox authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Summarization(#[from] SummarizationError),
}

impl CollaboratorError {
    pub fn mailbox(err: impl std::fmt::Display) -> Self {
        CollaboratorError::Mailbox(err.to_string())
    }
}

/// A session command could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no email numbered {0} in the current list")]
    NoSuchEmail(usize),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
