//! Error types for the legal analysis core.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! subsystems (splitting, storage, retrieval, chat, review), plus the
//! [`ErrorKind`] classification consumed by the retry combinator and the
//! transport layer's error mapping.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classification used for retry policy and client mapping.
///
/// Every [`Error`] maps onto exactly one kind. The retry combinator
/// re-attempts `Transient` failures; everything else surfaces immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied invalid input (empty text, bad argument).
    InvalidInput,
    /// Referenced entity does not exist.
    NotFound,
    /// Operation conflicts with current state (e.g. backward status write).
    Conflict,
    /// A bounded queue or pool rejected the request.
    ResourceExhausted,
    /// Temporary failure; retrying may succeed.
    Transient,
    /// Permanent failure; retrying will not help.
    Fatal,
    /// Model output failed structured validation after repair.
    InvalidStructuredOutput,
    /// Operation was cancelled by the caller.
    Cancelled,
    /// Operation exceeded its deadline.
    DeadlineExceeded,
    /// Unexpected internal error; logged with a trace id.
    Internal,
}

/// Top-level error for core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Document splitting errors.
    #[error("split error: {0}")]
    Split(#[from] SplitError),

    /// Text extraction errors.
    #[error("extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Embedding generation errors.
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Vector index errors.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Storage errors (SQL store operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chat backend errors.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Structured analyzer errors.
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    /// Contract review pipeline errors.
    #[error("review error: {0}")]
    Review(#[from] ReviewError),

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline.
    #[error("deadline exceeded after {seconds}s")]
    DeadlineExceeded {
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// A bounded pool or queue rejected the request.
    #[error("resource exhausted: {resource}")]
    ResourceExhausted {
        /// Name of the exhausted resource.
        resource: String,
    },

    /// Invalid caller input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what was invalid.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Unexpected internal error, carrying a trace id for correlation.
    #[error("internal error [{trace_id}]: {message}")]
    Internal {
        /// Trace id logged alongside the underlying cause.
        trace_id: String,
        /// Generic description; the cause stays in the logs.
        message: String,
    },
}

/// Splitting-specific errors.
#[derive(Error, Debug)]
pub enum SplitError {
    /// Input text was empty after trimming.
    #[error("document text is empty")]
    EmptyText,

    /// Invalid splitter configuration.
    #[error("invalid split configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Overlap exceeds the chunk budget.
    #[error("overlap {overlap} must be less than max chars {max}")]
    OverlapTooLarge {
        /// Overlap size in characters.
        overlap: usize,
        /// Maximum chunk size in characters.
        max: usize,
    },

    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

/// Text extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The MIME type is not supported by this extractor.
    #[error("unsupported mime type: {mime}")]
    UnsupportedMime {
        /// The rejected MIME type.
        mime: String,
    },

    /// The document bytes could not be decoded.
    #[error("corrupt document: {reason}")]
    Corrupt {
        /// Why decoding failed.
        reason: String,
    },
}

/// Embedding generation errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Temporary failure (network, service hiccup); retryable.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// The embedding service applied rate limiting; retryable with backoff.
    #[error("embedding rate limited: {0}")]
    RateLimited(String),

    /// Permanent failure; not retryable.
    #[error("fatal embedding failure: {0}")]
    Fatal(String),
}

/// Vector index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Write rejected because the vector dimension differs from the index.
    #[error("vector dimension mismatch: got {got}, index requires {required}")]
    DimensionMismatch {
        /// Dimension of the offered vector.
        got: usize,
        /// Dimension the index was configured with.
        required: usize,
    },

    /// Underlying index backend failure.
    #[error("index backend error: {0}")]
    Backend(String),
}

/// Storage-specific errors for the SQL store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Store not initialized (schema missing).
    #[error("store not initialized. Run: lexrag init")]
    NotInitialized,

    /// Document not found by id.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Document id that was not found.
        id: String,
    },

    /// Session not found by id.
    #[error("session not found: {id}")]
    SessionNotFound {
        /// Session id that was not found.
        id: String,
    },

    /// Review not found by id.
    #[error("review not found: {id}")]
    ReviewNotFound {
        /// Review id that was not found.
        id: String,
    },

    /// Attempted a backward review status transition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current persisted status.
        from: String,
        /// Rejected target status.
        to: String,
    },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Chat backend errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Temporary failure (network, 5xx); retryable.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend applied rate limiting; retryable with backoff.
    #[error("backend rate limited: {0}")]
    RateLimited(String),

    /// Permanent failure; not retryable.
    #[error("fatal backend failure: {0}")]
    Fatal(String),

    /// The stream terminated with an error frame.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Structured analyzer errors.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// No JSON payload could be located in the model output.
    #[error("no JSON payload found in model output")]
    NoJsonFound,

    /// Output failed validation after the repair attempt. The raw model
    /// output is carried for diagnostics and must never reach user-visible
    /// responses.
    #[error("invalid structured output: {reason}")]
    InvalidOutput {
        /// Why validation failed.
        reason: String,
        /// Raw model output, for diagnostics only.
        raw: String,
    },

    /// Output contained a refusal or meta-commentary marker.
    #[error("model output rejected by quality filter: matched {marker:?}")]
    QualityRejected {
        /// The marker that matched.
        marker: String,
    },
}

/// Contract review pipeline errors.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// Extracted contract text is too short to analyze.
    #[error("contract text too short: {chars} chars, minimum {min}")]
    ContractTooShort {
        /// Extracted character count.
        chars: usize,
        /// Configured minimum.
        min: usize,
    },

    /// A stage failed fatally.
    #[error("stage {stage} failed: {reason}")]
    StageFailed {
        /// Stage name.
        stage: String,
        /// Failure description.
        reason: String,
    },

    /// The review worker is gone (process shutdown mid-review).
    #[error("review worker terminated unexpectedly")]
    WorkerGone,
}

impl Error {
    /// Classifies this error into its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Split(e) => match e {
                SplitError::EmptyText => ErrorKind::InvalidInput,
                _ => ErrorKind::Fatal,
            },
            Self::Extract(_) => ErrorKind::InvalidInput,
            Self::Embed(e) => match e {
                EmbedError::Transient(_) | EmbedError::RateLimited(_) => ErrorKind::Transient,
                EmbedError::Fatal(_) => ErrorKind::Fatal,
            },
            Self::Index(e) => match e {
                IndexError::DimensionMismatch { .. } => ErrorKind::Conflict,
                IndexError::Backend(_) => ErrorKind::Transient,
            },
            Self::Storage(e) => match e {
                StorageError::DocumentNotFound { .. }
                | StorageError::SessionNotFound { .. }
                | StorageError::ReviewNotFound { .. } => ErrorKind::NotFound,
                StorageError::InvalidTransition { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            Self::Backend(e) => match e {
                BackendError::Transient(_) | BackendError::RateLimited(_) => ErrorKind::Transient,
                BackendError::Fatal(_) | BackendError::Stream(_) => ErrorKind::Fatal,
            },
            Self::Analyzer(_) => ErrorKind::InvalidStructuredOutput,
            Self::Review(_) => ErrorKind::Fatal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Config { .. } => ErrorKind::Fatal,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the retry combinator may re-attempt the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Builds an `Internal` error with a fresh trace id, logging the cause.
    #[must_use]
    pub fn internal(message: &str, cause: &dyn std::fmt::Display) -> Self {
        let trace_id = uuid::Uuid::new_v4().simple().to_string();
        tracing::error!(trace_id = %trace_id, cause = %cause, "{message}");
        Self::Internal {
            trace_id,
            message: message.to_string(),
        }
    }
}

// Implement From traits for library errors

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<regex::Error> for SplitError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
