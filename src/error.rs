// src/error.rs

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the canonicalization pipeline.
///
/// Only `Config` and `InvariantViolation` (after one retry) abort a run;
/// everything else is surfaced per record, logged, and skipped.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration detected at startup. Fatal for the whole run.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Canonical store failure (schema, query, or write).
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Variation payload could not be encoded or decoded.
    #[error("variation encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// CSV export failure.
    #[error("export error: {0}")]
    Export(#[from] csv::Error),

    /// Source stream or file I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The NER backend was absent, errored, or timed out. Never fatal:
    /// the rule-classifier result stands.
    #[error("ner backend unavailable: {0}")]
    NerUnavailable(String),

    /// A single record could not be processed. The run continues.
    #[error("record {id}: {reason}")]
    RecordFailed { id: String, reason: String },

    /// A store invariant (unique key, confidence bound) was violated and
    /// the one-shot retry also failed. Fatal for the record, not the run.
    #[error("store invariant violated: {0}")]
    InvariantViolation(String),
}

impl PipelineError {
    /// Errors that must abort the run instead of skipping the record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}
