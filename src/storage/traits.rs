//! Store port definition.
//!
//! Transactional CRUD for documents/segments, chat sessions/messages, and
//! reviews/risk clauses. Ownership cascades on delete; sequence numbers
//! and status transitions are enforced here so every caller observes the
//! same invariants.

use crate::core::{
    ChatMessage, ChatSession, ContractReview, Document, ReviewStatus, RiskClause, RiskLevel,
    Segment,
};
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;

/// Port for the SQL store.
///
/// Implementations must be `Send`; the service layer serializes access
/// through a mutex and session-scoped locks.
pub trait Store: Send {
    /// Initializes storage (creates schema, runs migrations). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    fn init(&mut self) -> Result<()>;

    /// Checks if storage is initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    fn is_initialized(&self) -> Result<bool>;

    /// Deletes all data but preserves the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn reset(&mut self) -> Result<()>;

    // ==================== Document Operations ====================

    /// Inserts a document record.
    ///
    /// # Errors
    ///
    /// Returns an error on conflict or database failure.
    fn insert_document(&mut self, document: &Document) -> Result<()>;

    /// Retrieves a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Finds a document by its content hash (deduplication lookup).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    /// Lists all documents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_documents(&self) -> Result<Vec<Document>>;

    /// Updates a document's counters and metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist.
    fn update_document(&mut self, document: &Document) -> Result<()>;

    /// Deletes a document and, by cascade, its segments and embeddings.
    /// Missing ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn delete_document(&mut self, id: &str) -> Result<()>;

    // ==================== Segment Operations ====================

    /// Inserts a batch of segments together with their embeddings in one
    /// transaction. Assigns ids into the passed segments. `vectors` may be
    /// shorter than `segments` when trailing segments failed to embed;
    /// those are stored without an embedding row.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails (nothing is visible).
    fn insert_segment_batch(
        &mut self,
        segments: &mut [Segment],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Retrieves all segments of a document in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_segments(&self, document_id: &str) -> Result<Vec<Segment>>;

    /// Retrieves segments by their ids, preserving the requested order.
    /// Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_segments_by_ids(&self, ids: &[i64]) -> Result<Vec<Segment>>;

    /// Marks segments whose embedding batch permanently failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn mark_embedding_failed(&mut self, segment_ids: &[i64]) -> Result<()>;

    /// Counts segments of a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    fn segment_count(&self, document_id: &str) -> Result<usize>;

    /// Streams every stored embedding as `(segment_id, vector)`. Used to
    /// rehydrate the in-memory vector index at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_all_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>>;

    // ==================== Dead-letter Operations ====================

    /// Records a permanently failed embedding batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn record_dead_letter(&mut self, document_id: &str, batch_index: usize, reason: &str)
    -> Result<()>;

    /// Lists dead-letter entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;

    // ==================== Session Operations ====================

    /// Creates a chat session.
    ///
    /// # Errors
    ///
    /// Returns an error on conflict or database failure.
    fn create_session(&mut self, session: &ChatSession) -> Result<()>;

    /// Retrieves a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_session(&self, id: &str) -> Result<Option<ChatSession>>;

    /// Lists a user's sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>>;

    /// Deletes a session and, by cascade, its messages. Missing ids are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn delete_session(&mut self, id: &str) -> Result<()>;

    /// Appends a message, allocating the next `seq` within the same
    /// transaction and bumping the session's `updated_at`. Returns the
    /// stored message with `id` and `seq` set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StorageError::SessionNotFound`] when the
    /// session does not exist.
    fn append_message(&mut self, message: &ChatMessage) -> Result<ChatMessage>;

    /// Retrieves the last `limit` messages of a session in ascending `seq`
    /// order. `limit = 0` means all.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    // ==================== Review Operations ====================

    /// Inserts a review in `PENDING`.
    ///
    /// # Errors
    ///
    /// Returns an error on conflict or database failure.
    fn insert_review(&mut self, review: &ContractReview) -> Result<()>;

    /// Retrieves a review by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_review(&self, id: &str) -> Result<Option<ContractReview>>;

    /// Finds a user's review of the given content hash, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_review_by_hash(&self, user_id: &str, hash: &str) -> Result<Option<ContractReview>>;

    /// Lists a user's reviews, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_reviews(&self, user_id: &str) -> Result<Vec<ContractReview>>;

    /// Stores the extracted contract text (PARSING stage output).
    ///
    /// # Errors
    ///
    /// Returns an error if the review does not exist.
    fn set_review_text(&mut self, id: &str, text: &str) -> Result<()>;

    /// Transitions a review's status. Enforces the monotonic transition
    /// table; `error_message` is recorded on `FAILED`, and `completed_at`
    /// is stamped on terminal states.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StorageError::InvalidTransition`] for
    /// backward transitions and `ReviewNotFound` for unknown ids.
    fn transition_review(
        &mut self,
        id: &str,
        to: ReviewStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Stores the finished report, risk summary, and clauses; the review
    /// must already be `COMPLETED`-transitionable (i.e. `PROCESSING`).
    ///
    /// # Errors
    ///
    /// Returns an error on invalid transition or database failure.
    fn complete_review(
        &mut self,
        id: &str,
        result: &serde_json::Value,
        risk_level: RiskLevel,
        clauses: &[RiskClause],
    ) -> Result<()>;

    /// Retrieves the risk clauses of a review.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_risk_clauses(&self, review_id: &str) -> Result<Vec<RiskClause>>;

    // ==================== Statistics ====================

    /// Gathers aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    fn stats(&self) -> Result<StoreStats>;
}

/// A dead-lettered embedding batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    /// Document whose batch failed.
    pub document_id: String,
    /// 0-based batch index within the ingest.
    pub batch_index: usize,
    /// Final error message after retries were exhausted.
    pub reason: String,
    /// Unix timestamp of the failure.
    pub created_at: i64,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Number of documents.
    pub documents: usize,
    /// Number of segments.
    pub segments: usize,
    /// Number of stored embeddings.
    pub embeddings: usize,
    /// Documents per category.
    pub by_category: HashMap<String, usize>,
    /// Number of chat sessions.
    pub sessions: usize,
    /// Number of chat messages.
    pub messages: usize,
    /// Number of contract reviews.
    pub reviews: usize,
    /// Number of dead-lettered batches.
    pub dead_letters: usize,
}
