//! Text extraction port.
//!
//! The core consumes extracted plain text; byte-level parsing of PDF and
//! DOCX lives behind this port in an external collaborator. The in-tree
//! [`PlainTextExtractor`] handles the text MIME family and is what the CLI
//! and the test suite run against.

use crate::error::{ExtractError, Result};

/// Result of a text extraction: normalized UTF-8 plus any warnings the
/// extractor wants surfaced (dropped images, suspicious encodings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Extracted text, `\n` line endings, paragraph breaks preserved.
    pub text: String,
    /// Non-fatal extraction warnings.
    pub warnings: Vec<String>,
}

/// Port for turning uploaded bytes into plain text.
///
/// Implementations must be `Send + Sync`; the review pipeline and the
/// ingestion coordinator call them from worker tasks.
pub trait TextExtractor: Send + Sync {
    /// Extracts plain text from document bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnsupportedMime`] for MIME types the
    /// extractor does not handle and [`ExtractError::Corrupt`] when the
    /// bytes cannot be decoded.
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<Extraction>;

    /// MIME types this extractor accepts.
    fn supported_mimes(&self) -> &'static [&'static str];
}

/// Extractor for the `text/*` MIME family.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    /// Creates a plain-text extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<Extraction> {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        if !(base.starts_with("text/") || base == "application/json") {
            return Err(ExtractError::UnsupportedMime {
                mime: base.to_string(),
            }
            .into());
        }

        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Corrupt {
            reason: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;

        // Normalize line endings; keep blank lines so paragraph structure
        // survives into the splitter.
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

        Ok(Extraction {
            text: normalized,
            warnings: Vec::new(),
        })
    }

    fn supported_mimes(&self) -> &'static [&'static str] {
        &["text/plain", "text/markdown", "application/json"]
    }
}
