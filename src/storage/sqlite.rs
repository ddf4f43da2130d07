//! `SQLite` store implementation.
//!
//! Persistent storage with WAL journaling, foreign-key enforcement, and
//! transactional writes. Sequence allocation and review status
//! transitions happen inside transactions so their invariants hold under
//! concurrent callers.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::core::{
    ChatMessage, ChatSession, ContractReview, Document, MessageMetadata, ReviewStatus, Role,
    RiskClause, RiskLevel, Segment, SegmentMetadata, now_ts,
};
use crate::error::{Result, StorageError};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
    get_migrations_from,
};
use crate::storage::traits::{DeadLetter, Store, StoreStats};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// SQLite-backed [`Store`] implementation.
///
/// # Examples
///
/// ```no_run
/// use lexrag::storage::{SqliteStore, Store};
///
/// let mut store = SqliteStore::open("lexrag.db").unwrap();
/// store.init().unwrap();
/// ```
pub struct SqliteStore {
    /// `SQLite` connection.
    conn: Connection,
    /// Path to the database file (None for in-memory).
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates a `SQLite` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        Ok(Self { conn, path: None })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn get_schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;
        Ok(version.and_then(|v| v.parse().ok()))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
        let category: String = row.get("category")?;
        let metadata: String = row.get("metadata")?;
        Ok(Document {
            id: row.get("id")?,
            title: row.get("title")?,
            mime_type: row.get("mime_type")?,
            category: crate::core::DocCategory::parse(&category),
            content_hash: row.get("content_hash")?,
            segment_count: row.get::<_, i64>("segment_count")? as usize,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        })
    }

    fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<Segment> {
        let metadata: String = row.get("metadata")?;
        let metadata: SegmentMetadata = serde_json::from_str(&metadata).unwrap_or_default();
        Ok(Segment {
            id: Some(row.get("id")?),
            document_id: row.get("document_id")?,
            ordinal: row.get::<_, i64>("ordinal")? as usize,
            text: row.get("text")?,
            estimated_tokens: row.get::<_, i64>("estimated_tokens")? as usize,
            metadata,
        })
    }

    fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
        Ok(ChatSession {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
        let role: String = row.get("role")?;
        let metadata: String = row.get("metadata")?;
        Ok(ChatMessage {
            id: Some(row.get("id")?),
            session_id: row.get("session_id")?,
            role: Role::parse(&role).unwrap_or(Role::User),
            content: row.get("content")?,
            metadata: serde_json::from_str::<MessageMetadata>(&metadata).unwrap_or_default(),
            created_at: row.get("created_at")?,
            seq: row.get("seq")?,
        })
    }

    fn review_from_row(row: &Row<'_>) -> rusqlite::Result<ContractReview> {
        let status: String = row.get("status")?;
        let risk_level: Option<String> = row.get("risk_level")?;
        let result: Option<String> = row.get("result")?;
        Ok(ContractReview {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            filename: row.get("filename")?,
            size: row.get::<_, i64>("size")? as usize,
            hash: row.get("hash")?,
            extracted_text: row.get("extracted_text")?,
            status: ReviewStatus::parse(&status).unwrap_or(ReviewStatus::Failed),
            risk_level: risk_level.as_deref().and_then(RiskLevel::parse),
            total_risks: row
                .get::<_, Option<i64>>("total_risks")?
                .map(|n| n as usize),
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn clause_from_row(row: &Row<'_>) -> rusqlite::Result<RiskClause> {
        let level: String = row.get("risk_level")?;
        Ok(RiskClause {
            id: Some(row.get("id")?),
            review_id: row.get("review_id")?,
            clause_text: row.get("clause_text")?,
            risk_type: row.get("risk_type")?,
            risk_level: RiskLevel::parse(&level).unwrap_or(RiskLevel::Low),
            description: row.get("description")?,
            suggestion: row.get("suggestion")?,
            legal_basis: row.get("legal_basis")?,
            position_start: row
                .get::<_, Option<i64>>("position_start")?
                .map(|n| n as usize),
            position_end: row
                .get::<_, Option<i64>>("position_end")?
                .map(|n| n as usize),
        })
    }
}

/// Serializes an f32 vector as little-endian bytes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserializes little-endian bytes back into an f32 vector.
fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

impl Store for SqliteStore {
    fn init(&mut self) -> Result<()> {
        let is_init: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            self.conn
                .execute_batch(SCHEMA_SQL)
                .map_err(StorageError::from)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else if let Some(current) = self.get_schema_version()?
            && current < CURRENT_SCHEMA_VERSION
        {
            for migration in get_migrations_from(current) {
                self.conn
                    .execute_batch(migration.sql)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
            }
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    fn reset(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            DELETE FROM risk_clauses;
            DELETE FROM reviews;
            DELETE FROM messages;
            DELETE FROM sessions;
            DELETE FROM dead_letters;
            DELETE FROM segment_embeddings;
            DELETE FROM segments;
            DELETE FROM documents;
        ",
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Document Operations ====================

    fn insert_document(&mut self, document: &Document) -> Result<()> {
        let metadata =
            serde_json::to_string(&document.metadata).map_err(StorageError::from)?;
        self.conn
            .execute(
                r"
            INSERT INTO documents (
                id, title, mime_type, category, content_hash,
                segment_count, created_at, updated_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
                params![
                    document.id,
                    document.title,
                    document.mime_type,
                    document.category.as_str(),
                    document.content_hash,
                    document.segment_count as i64,
                    document.created_at,
                    document.updated_at,
                    metadata,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?",
                params![id],
                Self::document_from_row,
            )
            .optional()
            .map_err(|e| StorageError::from(e).into())
    }

    fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        self.conn
            .query_row(
                "SELECT * FROM documents WHERE content_hash = ?",
                params![content_hash],
                Self::document_from_row,
            )
            .optional()
            .map_err(|e| StorageError::from(e).into())
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM documents ORDER BY created_at DESC, id")
            .map_err(StorageError::from)?;
        let documents = stmt
            .query_map([], Self::document_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(documents)
    }

    fn update_document(&mut self, document: &Document) -> Result<()> {
        let metadata =
            serde_json::to_string(&document.metadata).map_err(StorageError::from)?;
        let changed = self
            .conn
            .execute(
                r"
            UPDATE documents
            SET title = ?, segment_count = ?, updated_at = ?, metadata = ?
            WHERE id = ?
        ",
                params![
                    document.title,
                    document.segment_count as i64,
                    now_ts(),
                    metadata,
                    document.id,
                ],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::DocumentNotFound {
                id: document.id.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn delete_document(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM documents WHERE id = ?", params![id])
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Segment Operations ====================

    fn insert_segment_batch(
        &mut self,
        segments: &mut [Segment],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let now = now_ts();

        for (i, segment) in segments.iter_mut().enumerate() {
            let metadata =
                serde_json::to_string(&segment.metadata).map_err(StorageError::from)?;
            tx.execute(
                r"
                INSERT INTO segments (document_id, ordinal, text, estimated_tokens, metadata)
                VALUES (?, ?, ?, ?, ?)
            ",
                params![
                    segment.document_id,
                    segment.ordinal as i64,
                    segment.text,
                    segment.estimated_tokens as i64,
                    metadata,
                ],
            )
            .map_err(StorageError::from)?;
            let id = tx.last_insert_rowid();
            segment.id = Some(id);

            if let Some(vector) = vectors.get(i) {
                tx.execute(
                    r"
                    INSERT INTO segment_embeddings (segment_id, embedding, dimensions, created_at)
                    VALUES (?, ?, ?, ?)
                ",
                    params![id, vector_to_blob(vector), vector.len() as i64, now],
                )
                .map_err(StorageError::from)?;
            }
        }

        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM segments WHERE document_id = ? ORDER BY ordinal")
            .map_err(StorageError::from)?;
        let segments = stmt
            .query_map(params![document_id], Self::segment_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(segments)
    }

    fn get_segments_by_ids(&self, ids: &[i64]) -> Result<Vec<Segment>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM segments WHERE id = ?")
            .map_err(StorageError::from)?;
        let mut segments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(segment) = stmt
                .query_row(params![id], Self::segment_from_row)
                .optional()
                .map_err(StorageError::from)?
            {
                segments.push(segment);
            }
        }
        Ok(segments)
    }

    fn mark_embedding_failed(&mut self, segment_ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        for id in segment_ids {
            let metadata: Option<String> = tx
                .query_row(
                    "SELECT metadata FROM segments WHERE id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StorageError::from)?;
            if let Some(metadata) = metadata {
                let mut parsed: SegmentMetadata =
                    serde_json::from_str(&metadata).unwrap_or_default();
                parsed.embedding_failed = true;
                let updated = serde_json::to_string(&parsed).map_err(StorageError::from)?;
                tx.execute(
                    "UPDATE segments SET metadata = ? WHERE id = ?",
                    params![updated, id],
                )
                .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn segment_count(&self, document_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM segments WHERE document_id = ?",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    fn get_all_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT segment_id, embedding FROM segment_embeddings ORDER BY segment_id")
            .map_err(StorageError::from)?;
        let embeddings = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, blob_to_vector(&blob)))
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(embeddings)
    }

    // ==================== Dead-letter Operations ====================

    fn record_dead_letter(
        &mut self,
        document_id: &str,
        batch_index: usize,
        reason: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                r"
            INSERT INTO dead_letters (document_id, batch_index, reason, created_at)
            VALUES (?, ?, ?, ?)
        ",
                params![document_id, batch_index as i64, reason, now_ts()],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM dead_letters ORDER BY created_at DESC, id DESC")
            .map_err(StorageError::from)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    document_id: row.get("document_id")?,
                    batch_index: row.get::<_, i64>("batch_index")? as usize,
                    reason: row.get("reason")?,
                    created_at: row.get("created_at")?,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(entries)
    }

    // ==================== Session Operations ====================

    fn create_session(&mut self, session: &ChatSession) -> Result<()> {
        self.conn
            .execute(
                r"
            INSERT INTO sessions (id, user_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
        ",
                params![
                    session.id,
                    session.user_id,
                    session.title,
                    session.created_at,
                    session.updated_at,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        self.conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?",
                params![id],
                Self::session_from_row,
            )
            .optional()
            .map_err(|e| StorageError::from(e).into())
    }

    fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM sessions WHERE user_id = ? ORDER BY updated_at DESC, id")
            .map_err(StorageError::from)?;
        let sessions = stmt
            .query_map(params![user_id], Self::session_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(sessions)
    }

    fn delete_session(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?", params![id])
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn append_message(&mut self, message: &ChatMessage) -> Result<ChatMessage> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?",
                params![message.session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        if exists.is_none() {
            return Err(StorageError::SessionNotFound {
                id: message.session_id.clone(),
            }
            .into());
        }

        // Next seq inside the transaction keeps the sequence gap-free.
        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?",
                params![message.session_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;

        let metadata = serde_json::to_string(&message.metadata).map_err(StorageError::from)?;
        let created_at = now_ts();
        tx.execute(
            r"
            INSERT INTO messages (session_id, role, content, metadata, created_at, seq)
            VALUES (?, ?, ?, ?, ?, ?)
        ",
            params![
                message.session_id,
                message.role.as_str(),
                message.content,
                metadata,
                created_at,
                seq,
            ],
        )
        .map_err(StorageError::from)?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions SET updated_at = ? WHERE id = ?",
            params![created_at, message.session_id],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;

        let mut stored = message.clone();
        stored.id = Some(id);
        stored.seq = seq;
        stored.created_at = created_at;
        Ok(stored)
    }

    fn get_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let sql = if limit == 0 {
            "SELECT * FROM messages WHERE session_id = ? ORDER BY seq"
        } else {
            // Last N, returned in ascending order.
            "SELECT * FROM (
                SELECT * FROM messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2
            ) ORDER BY seq"
        };
        let mut stmt = self.conn.prepare(sql).map_err(StorageError::from)?;
        let messages = if limit == 0 {
            stmt.query_map(params![session_id], Self::message_from_row)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map(params![session_id, limit as i64], Self::message_from_row)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
        }
        .map_err(StorageError::from)?;
        Ok(messages)
    }

    // ==================== Review Operations ====================

    fn insert_review(&mut self, review: &ContractReview) -> Result<()> {
        self.conn
            .execute(
                r"
            INSERT INTO reviews (
                id, user_id, filename, size, hash, extracted_text, status,
                risk_level, total_risks, result, error_message, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
                params![
                    review.id,
                    review.user_id,
                    review.filename,
                    review.size as i64,
                    review.hash,
                    review.extracted_text,
                    review.status.as_str(),
                    review.risk_level.map(RiskLevel::as_str),
                    review.total_risks.map(|n| n as i64),
                    review
                        .result
                        .as_ref()
                        .map(serde_json::Value::to_string),
                    review.error_message,
                    review.created_at,
                    review.completed_at,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn get_review(&self, id: &str) -> Result<Option<ContractReview>> {
        self.conn
            .query_row(
                "SELECT * FROM reviews WHERE id = ?",
                params![id],
                Self::review_from_row,
            )
            .optional()
            .map_err(|e| StorageError::from(e).into())
    }

    fn find_review_by_hash(&self, user_id: &str, hash: &str) -> Result<Option<ContractReview>> {
        self.conn
            .query_row(
                "SELECT * FROM reviews WHERE user_id = ? AND hash = ?
                 ORDER BY created_at DESC LIMIT 1",
                params![user_id, hash],
                Self::review_from_row,
            )
            .optional()
            .map_err(|e| StorageError::from(e).into())
    }

    fn list_reviews(&self, user_id: &str) -> Result<Vec<ContractReview>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM reviews WHERE user_id = ? ORDER BY created_at DESC, id")
            .map_err(StorageError::from)?;
        let reviews = stmt
            .query_map(params![user_id], Self::review_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(reviews)
    }

    fn set_review_text(&mut self, id: &str, text: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE reviews SET extracted_text = ? WHERE id = ?",
                params![text, id],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::ReviewNotFound { id: id.to_string() }.into());
        }
        Ok(())
    }

    fn transition_review(
        &mut self,
        id: &str,
        to: ReviewStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM reviews WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        let Some(current) = current else {
            return Err(StorageError::ReviewNotFound { id: id.to_string() }.into());
        };
        let from = ReviewStatus::parse(&current).unwrap_or(ReviewStatus::Failed);
        if !from.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            }
            .into());
        }

        let completed_at = to.is_terminal().then(now_ts);
        tx.execute(
            r"
            UPDATE reviews
            SET status = ?,
                error_message = COALESCE(?, error_message),
                completed_at = COALESCE(?, completed_at)
            WHERE id = ?
        ",
            params![to.as_str(), error_message, completed_at, id],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn complete_review(
        &mut self,
        id: &str,
        result: &serde_json::Value,
        risk_level: RiskLevel,
        clauses: &[RiskClause],
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM reviews WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        let Some(current) = current else {
            return Err(StorageError::ReviewNotFound { id: id.to_string() }.into());
        };
        let from = ReviewStatus::parse(&current).unwrap_or(ReviewStatus::Failed);
        if !from.can_transition_to(ReviewStatus::Completed) {
            return Err(StorageError::InvalidTransition {
                from: from.as_str().to_string(),
                to: ReviewStatus::Completed.as_str().to_string(),
            }
            .into());
        }

        tx.execute(
            r"
            UPDATE reviews
            SET status = 'COMPLETED', result = ?, risk_level = ?,
                total_risks = ?, completed_at = ?
            WHERE id = ?
        ",
            params![
                result.to_string(),
                risk_level.as_str(),
                clauses.len() as i64,
                now_ts(),
                id,
            ],
        )
        .map_err(StorageError::from)?;

        for clause in clauses {
            tx.execute(
                r"
                INSERT INTO risk_clauses (
                    review_id, clause_text, risk_type, risk_level,
                    description, suggestion, legal_basis, position_start, position_end
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
                params![
                    id,
                    clause.clause_text,
                    clause.risk_type,
                    clause.risk_level.as_str(),
                    clause.description,
                    clause.suggestion,
                    clause.legal_basis,
                    clause.position_start.map(|n| n as i64),
                    clause.position_end.map(|n| n as i64),
                ],
            )
            .map_err(StorageError::from)?;
        }

        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_risk_clauses(&self, review_id: &str) -> Result<Vec<RiskClause>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM risk_clauses WHERE review_id = ? ORDER BY id")
            .map_err(StorageError::from)?;
        let clauses = stmt
            .query_map(params![review_id], Self::clause_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(clauses)
    }

    // ==================== Statistics ====================

    fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(StorageError::from)?;
            Ok(n as usize)
        };

        let mut by_category = std::collections::HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT category, COUNT(*) FROM documents GROUP BY category")
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })
                .map_err(StorageError::from)?;
            for row in rows {
                let (category, n) = row.map_err(StorageError::from)?;
                by_category.insert(category, n);
            }
        }

        Ok(StoreStats {
            documents: count("SELECT COUNT(*) FROM documents")?,
            segments: count("SELECT COUNT(*) FROM segments")?,
            embeddings: count("SELECT COUNT(*) FROM segment_embeddings")?,
            by_category,
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            messages: count("SELECT COUNT(*) FROM messages")?,
            reviews: count("SELECT COUNT(*) FROM reviews")?,
            dead_letters: count("SELECT COUNT(*) FROM dead_letters")?,
        })
    }
}
