//! Ingestion coordination.
//!
//! Takes uploaded bytes to indexed segments: extract, hash-dedup, split,
//! batch-embed, and write store + index with per-batch atomicity.
//! Concurrent uploads of identical bytes share one execution through a
//! single-flight group keyed by content hash. A permanently failing
//! embedding batch dead-letters instead of aborting the document.

use crate::config::CoreConfig;
use crate::core::{DocCategory, Document, Segment, content_hash};
use crate::embedding::Embedder;
use crate::error::{Error, ErrorKind, Result};
use crate::extract::TextExtractor;
use crate::index::VectorIndex;
use crate::runtime::{RetryConfig, SingleFlight, retry};
use crate::split::LegalSplitter;
use crate::storage::{SharedStore, StoreStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one ingest call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// Stable document id.
    pub document_id: String,
    /// Total segments stored for the document.
    pub segments: usize,
    /// Segments that received embeddings.
    pub embedded: usize,
    /// Whether the upload matched an existing document (no-op).
    pub deduplicated: bool,
    /// Non-fatal warnings (dead-lettered batches).
    pub warnings: Vec<String>,
}

/// Clonable error image for sharing across single-flight followers.
#[derive(Debug, Clone)]
struct ErrorShadow {
    kind: ErrorKind,
    message: String,
}

impl ErrorShadow {
    fn of(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn into_error(self) -> Error {
        match self.kind {
            ErrorKind::InvalidInput => Error::InvalidInput {
                message: self.message,
            },
            ErrorKind::ResourceExhausted => Error::ResourceExhausted {
                resource: self.message,
            },
            ErrorKind::Cancelled => Error::Cancelled,
            _ => Error::Internal {
                trace_id: uuid::Uuid::new_v4().simple().to_string(),
                message: self.message,
            },
        }
    }
}

/// Coordinates ingestion of documents into the store and vector index.
pub struct IngestionCoordinator {
    config: CoreConfig,
    splitter: LegalSplitter,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: SharedStore,
    inflight: SingleFlight<String, std::result::Result<IngestOutcome, ErrorShadow>>,
}

impl IngestionCoordinator {
    /// Creates a coordinator over the given ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the splitter rejects the configuration.
    pub fn new(
        config: CoreConfig,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: SharedStore,
    ) -> Result<Self> {
        let splitter = LegalSplitter::new((&config).into())?;
        Ok(Self {
            config,
            splitter,
            extractor,
            embedder,
            index,
            store,
            inflight: SingleFlight::new(),
        })
    }

    /// Ingests a document. Identical bytes return the existing document id
    /// without re-indexing; concurrent identical uploads share one
    /// execution.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unsupported/corrupt uploads or empty
    /// text. Embedding failures never fail the call; they surface as
    /// warnings with the document left partially indexed.
    pub async fn ingest_document(
        &self,
        bytes: &[u8],
        mime: &str,
        category: DocCategory,
        filename: &str,
    ) -> Result<IngestOutcome> {
        let hash = content_hash(bytes);
        let result = self
            .inflight
            .run(hash.clone(), || async {
                self.ingest_inner(bytes, mime, category, filename, &hash)
                    .await
                    .map_err(|e| ErrorShadow::of(&e))
            })
            .await;
        result.map_err(ErrorShadow::into_error)
    }

    async fn ingest_inner(
        &self,
        bytes: &[u8],
        mime: &str,
        category: DocCategory,
        filename: &str,
        hash: &str,
    ) -> Result<IngestOutcome> {
        // Dedup before any heavy work.
        {
            let store = self.store.lock().await;
            if let Some(existing) = store.find_document_by_hash(hash)? {
                tracing::info!(document_id = %existing.id, "duplicate upload; returning existing");
                return Ok(IngestOutcome {
                    segments: store.segment_count(&existing.id)?,
                    embedded: 0,
                    document_id: existing.id,
                    deduplicated: true,
                    warnings: Vec::new(),
                });
            }
        }

        let extraction = self.extractor.extract(bytes, mime)?;
        for warning in &extraction.warnings {
            tracing::warn!(filename, warning = %warning, "extractor warning");
        }

        let mut document = Document::new(filename, mime, category, hash);
        let segments =
            self.splitter
                .split(&document.id, &extraction.text, category, Some(filename))?;

        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.insert_document(&document) {
                // Lost a race with another writer of the same hash.
                if let Some(existing) = store.find_document_by_hash(hash)? {
                    return Ok(IngestOutcome {
                        segments: store.segment_count(&existing.id)?,
                        embedded: 0,
                        document_id: existing.id,
                        deduplicated: true,
                        warnings: Vec::new(),
                    });
                }
                return Err(e);
            }
        }

        let mut warnings = Vec::new();
        let mut embedded = 0;
        let total = segments.len();
        let mut remaining = segments;
        let mut batch_index = 0;

        while !remaining.is_empty() {
            let take = self.config.ingest_batch_size.min(remaining.len());
            let mut batch: Vec<Segment> = remaining.drain(..take).collect();

            match self.embed_batch(&batch).await {
                Ok(vectors) => {
                    let mut store = self.store.lock().await;
                    store.insert_segment_batch(&mut batch, &vectors)?;
                    drop(store);
                    // Index writes follow the committed transaction, so a
                    // batch becomes searchable all at once.
                    for (segment, vector) in batch.iter().zip(&vectors) {
                        self.index.upsert(segment, vector)?;
                    }
                    embedded += batch.len();
                }
                Err(e) => {
                    tracing::error!(
                        document_id = %document.id,
                        batch_index,
                        error = %e,
                        "embedding batch dead-lettered"
                    );
                    let mut store = self.store.lock().await;
                    store.insert_segment_batch(&mut batch, &[])?;
                    let ids: Vec<i64> = batch.iter().filter_map(|s| s.id).collect();
                    store.mark_embedding_failed(&ids)?;
                    store.record_dead_letter(&document.id, batch_index, &e.to_string())?;
                    warnings.push(format!("batch {batch_index} failed to embed: {e}"));
                }
            }
            batch_index += 1;
        }

        document.segment_count = total;
        if !warnings.is_empty() {
            document.mark_partially_indexed();
        }
        {
            let mut store = self.store.lock().await;
            store.update_document(&document)?;
        }

        tracing::info!(
            document_id = %document.id,
            segments = total,
            embedded,
            warnings = warnings.len(),
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id: document.id,
            segments: total,
            embedded,
            deduplicated: false,
            warnings,
        })
    }

    /// Embeds one batch with retries on transient failures.
    async fn embed_batch(&self, batch: &[Segment]) -> Result<Vec<Vec<f32>>> {
        let retry_config = RetryConfig {
            max_attempts: self.config.embed_retries,
            initial_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        };
        let texts: Vec<&str> = batch.iter().map(|s| s.text.as_str()).collect();
        retry(&retry_config, "embed-batch", || {
            let texts = texts.clone();
            async move { self.embedder.embed(&texts) }
        })
        .await
    }

    /// Deletes a document, its segments, and its index entries. Missing
    /// ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or index fails.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        {
            let mut store = self.store.lock().await;
            store.delete_document(document_id)?;
        }
        self.index.delete_document(document_id)?;
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    /// Aggregate corpus statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn stats(&self) -> Result<StoreStats> {
        let store = self.store.lock().await;
        store.stats()
    }
}
