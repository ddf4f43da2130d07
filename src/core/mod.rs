//! Core domain types.
//!
//! Records for documents, segments, chat sessions, and contract reviews.
//! Ownership runs parent to child: documents own segments, segments own
//! their embeddings, sessions own messages, reviews own risk clauses.
//! Deletion cascades along those edges in the store.

pub mod document;
pub mod review;
pub mod segment;
pub mod session;

pub use document::{DocCategory, Document, content_hash, document_id_for_hash};
pub use review::{ContractReview, ReviewStatus, RiskClause, RiskLevel};
pub use segment::{Segment, SegmentMetadata, estimate_tokens};
pub use session::{ChatMessage, ChatSession, MessageMetadata, Role, SourceRef};

/// Returns the current Unix timestamp in seconds.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
