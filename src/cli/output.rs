//! Output formatting.
//!
//! Text for humans, JSON for scripts. Errors map onto the stable
//! `{errorCode, message, traceId}` envelope.

use crate::error::{Error, ErrorKind};
use serde::Serialize;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Parses the format flag; unknown values fall back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Stable error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error_code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Correlation id for log lookup.
    pub trace_id: String,
}

/// Maps an error kind onto its wire code.
#[must_use]
pub const fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "INVALID_INPUT",
        ErrorKind::NotFound => "NOT_FOUND",
        ErrorKind::Conflict => "CONFLICT",
        ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        ErrorKind::Transient => "TRANSIENT",
        ErrorKind::Fatal => "FATAL",
        ErrorKind::InvalidStructuredOutput => "INVALID_STRUCTURED_OUTPUT",
        ErrorKind::Cancelled => "CANCELLED",
        ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
        ErrorKind::Internal => "INTERNAL",
    }
}

/// Builds the error envelope for an error.
#[must_use]
pub fn error_body(err: &Error) -> ErrorBody {
    let trace_id = match err {
        Error::Internal { trace_id, .. } => trace_id.clone(),
        _ => uuid::Uuid::new_v4().simple().to_string(),
    };
    ErrorBody {
        error_code: error_code(err.kind()),
        message: err.to_string(),
        trace_id,
    }
}

/// Formats an error for the selected output format.
#[must_use]
pub fn format_error(err: &Error, format: OutputFormat) -> String {
    let body = error_body(err);
    match format {
        OutputFormat::Json => {
            serde_json::to_string(&body).unwrap_or_else(|_| body.message.clone())
        }
        OutputFormat::Text => format!("[{}] {}", body.error_code, body.message),
    }
}

/// Serializes a value as pretty JSON, or a fallback message on failure.
#[must_use]
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}
