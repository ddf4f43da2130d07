//! Service assembly.
//!
//! [`CoreServices`] wires the configuration, ports, and orchestrators
//! together once at startup and is passed by reference from then on —
//! there is no global mutable state. The transport layer (and the CLI)
//! talk to the core exclusively through this struct.

use crate::backend::{ChatBackend, ScriptedBackend};
use crate::chat::ChatOrchestrator;
use crate::config::CoreConfig;
use crate::embedding::{Embedder, FallbackEmbedder};
use crate::error::Result;
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::index::{InMemoryIndex, VectorIndex};
use crate::ingest::IngestionCoordinator;
use crate::query::QueryAnalyzer;
use crate::render::{MinimalPdfRenderer, ReportRenderer};
use crate::retrieval::{ScoredSegment, hybrid_search};
use crate::review::ReviewPipeline;
use crate::storage::{SharedStore, SqliteStore, Store, shared};
use std::path::Path;
use std::sync::Arc;

/// External ports the core is assembled from.
pub struct CorePorts {
    /// Text extraction port.
    pub extractor: Arc<dyn TextExtractor>,
    /// Embedding port.
    pub embedder: Arc<dyn Embedder>,
    /// Vector index port.
    pub index: Arc<dyn VectorIndex>,
    /// Local chat model.
    pub local_backend: Arc<dyn ChatBackend>,
    /// Remote reasoning model.
    pub remote_backend: Arc<dyn ChatBackend>,
    /// Report renderer port.
    pub renderer: Arc<dyn ReportRenderer>,
}

impl CorePorts {
    /// Reference ports: plain-text extraction, the deterministic fallback
    /// embedder, the in-memory index, and the scripted backend.
    #[must_use]
    pub fn reference(config: &CoreConfig) -> Self {
        let backend: Arc<dyn ChatBackend> = Arc::new(ScriptedBackend::new());
        Self {
            extractor: Arc::new(PlainTextExtractor::new()),
            embedder: Arc::new(FallbackEmbedder::new(config.embedding_dim)),
            index: Arc::new(InMemoryIndex::new(config.embedding_dim)),
            local_backend: Arc::clone(&backend),
            remote_backend: backend,
            renderer: Arc::new(MinimalPdfRenderer::new()),
        }
    }
}

/// The assembled core: configuration, shared store, and orchestrators.
pub struct CoreServices {
    /// Immutable configuration.
    pub config: CoreConfig,
    /// Shared store handle.
    pub store: SharedStore,
    /// Vector index.
    pub index: Arc<dyn VectorIndex>,
    /// Embedding port.
    pub embedder: Arc<dyn Embedder>,
    /// Query analyzer.
    pub analyzer: QueryAnalyzer,
    /// Ingestion coordinator.
    pub ingestion: IngestionCoordinator,
    /// Chat orchestrator.
    pub chat: Arc<ChatOrchestrator>,
    /// Contract review pipeline.
    pub review: Arc<ReviewPipeline>,
}

impl CoreServices {
    /// Assembles the core from configuration, a store, and ports. The
    /// vector index is rehydrated from stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns configuration and storage errors.
    pub fn assemble(config: CoreConfig, mut store_impl: impl Store + 'static, ports: CorePorts) -> Result<Self> {
        config.validate()?;
        store_impl.init()?;
        rehydrate_index(&store_impl, ports.index.as_ref())?;
        let store = shared(store_impl);

        let ingestion = IngestionCoordinator::new(
            config.clone(),
            Arc::clone(&ports.extractor),
            Arc::clone(&ports.embedder),
            Arc::clone(&ports.index),
            Arc::clone(&store),
        )?;

        let chat = Arc::new(ChatOrchestrator::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&ports.index),
            Arc::clone(&ports.embedder),
            Arc::clone(&ports.local_backend),
            Arc::clone(&ports.remote_backend),
        )?);

        let review = Arc::new(ReviewPipeline::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&ports.extractor),
            Arc::clone(&ports.remote_backend),
            Arc::clone(&ports.renderer),
        ));

        Ok(Self {
            analyzer: QueryAnalyzer::new()?,
            config,
            store,
            index: ports.index,
            embedder: ports.embedder,
            ingestion,
            chat,
            review,
        })
    }

    /// Assembles the core against an on-disk SQLite database with the
    /// reference ports.
    ///
    /// # Errors
    ///
    /// Returns database and configuration errors.
    pub fn open<P: AsRef<Path>>(config: CoreConfig, db_path: P) -> Result<Self> {
        let store = SqliteStore::open(db_path)?;
        let ports = CorePorts::reference(&config);
        Self::assemble(config, store, ports)
    }

    /// Assembles an in-memory core with the reference ports.
    ///
    /// # Errors
    ///
    /// Returns configuration errors.
    pub fn in_memory(config: CoreConfig) -> Result<Self> {
        let store = SqliteStore::in_memory()?;
        let ports = CorePorts::reference(&config);
        Self::assemble(config, store, ports)
    }

    /// Runs a hybrid search over the corpus.
    ///
    /// # Errors
    ///
    /// Returns storage errors; index failures degrade per retrieval policy.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredSegment>> {
        let store = self.store.lock().await;
        hybrid_search(
            store.as_ref(),
            self.index.as_ref(),
            self.embedder.as_ref(),
            &self.analyzer,
            query,
            k,
        )
    }
}

/// Loads stored segments and embeddings into the vector index.
fn rehydrate_index(store: &impl Store, index: &dyn VectorIndex) -> Result<()> {
    if !store.is_initialized()? {
        return Ok(());
    }
    let embeddings: std::collections::HashMap<i64, Vec<f32>> =
        store.get_all_embeddings()?.into_iter().collect();
    if embeddings.is_empty() {
        return Ok(());
    }

    let mut loaded = 0usize;
    for document in store.list_documents()? {
        let segments = store.get_segments(&document.id)?;
        for segment in &segments {
            if let Some(id) = segment.id
                && let Some(vector) = embeddings.get(&id)
            {
                index.upsert(segment, vector)?;
                loaded += 1;
            }
        }
    }
    tracing::info!(vectors = loaded, "vector index rehydrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocCategory;

    #[tokio::test]
    async fn test_in_memory_assembly_and_search() {
        let services = CoreServices::in_memory(CoreConfig::default()).unwrap();
        let outcome = services
            .ingestion
            .ingest_document(
                "第三十条 企业事业单位和其他生产经营者，应当防止、减少环境污染和生态破坏。"
                    .as_bytes(),
                "text/plain",
                DocCategory::Law,
                "环境保护法.txt",
            )
            .await
            .unwrap();
        assert_eq!(outcome.segments, 1);

        let results = services.search("环境保护法第30条", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].segment.metadata.article_number.as_deref(),
            Some("第三十条")
        );
    }

    #[tokio::test]
    async fn test_open_rehydrates_index_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("core.db");

        let document_id = {
            let services = CoreServices::open(CoreConfig::default(), &db_path).unwrap();
            services
                .ingestion
                .ingest_document(
                    "第三十条 企业事业单位应当防止环境污染。".as_bytes(),
                    "text/plain",
                    DocCategory::Law,
                    "环境保护法.txt",
                )
                .await
                .unwrap()
                .document_id
        };

        // Fresh assembly against the same database: the index is rebuilt
        // from stored embeddings and exact search works again.
        let services = CoreServices::open(CoreConfig::default(), &db_path).unwrap();
        assert_eq!(services.index.len(), 1);
        let results = services.search("环境保护法第30条", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].segment.document_id, document_id);
    }

    #[test]
    fn test_invalid_config_rejected_at_assembly() {
        let config = CoreConfig {
            max_tokens: 0,
            ..CoreConfig::default()
        };
        assert!(CoreServices::in_memory(config).is_err());
    }
}
