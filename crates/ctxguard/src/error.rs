//! Typed errors for the crate's fallible operations.
//!
//! - `TokenCountError`: the token estimator collaborator failed
//! - `SummaryError`: the summarization collaborator failed
//! - `CondenseError`: a compaction pass could not complete
//! - `ConfigError`: configuration or conversation files could not be loaded

use std::path::PathBuf;
use thiserror::Error;

use crate::Message;

/// Errors from a [`TokenCounter`](crate::tokens::TokenCounter).
#[derive(Debug, Error)]
pub enum TokenCountError {
    #[error("token count request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token count endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode token count response: {0}")]
    Decode(String),

    #[error("token counter unavailable: {0}")]
    Unavailable(String),
}

/// Errors from a [`SummaryProvider`](crate::context::summarizer::SummaryProvider).
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarization call failed: {0}")]
    Provider(String),
}

/// Errors from a compaction pass.
#[derive(Debug, Error)]
pub enum CondenseError {
    /// The edit was applied but the new history could not be measured.
    ///
    /// `messages` holds the already-compacted history. Callers keep it and
    /// re-measure instead of repeating the pass.
    #[error("failed to measure condensed history: {source}")]
    Measurement {
        messages: Vec<Message>,
        #[source]
        source: TokenCountError,
    },

    #[error("not enough messages to summarize ({count})")]
    NotEnoughMessages { count: usize },

    #[error("conversation was summarized recently; refusing to summarize again")]
    RecentlySummarized,

    #[error("summarization returned an empty summary")]
    EmptySummary,

    #[error("summarization grew the context from {prev} to {new} tokens")]
    ContextGrew { prev: u64, new: u64 },

    #[error(transparent)]
    Summary(#[from] SummaryError),
}

impl CondenseError {
    /// Whether this is a measurement failure that the orchestrator must see.
    pub fn is_measurement(&self) -> bool {
        matches!(self, CondenseError::Measurement { .. })
    }
}

/// Errors loading configuration or conversation files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("truncation fraction must be within [0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("repetition exemption for '{0}' lists no values")]
    EmptyExemption(String),
}
