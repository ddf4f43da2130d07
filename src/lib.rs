//! # lexrag
//!
//! Retrieval-augmented legal analysis core.
//!
//! lexrag ingests legal documents into hierarchy-aware, token-bounded
//! segments, serves hybrid (exact + vector) retrieval over them, answers
//! grounded chat questions with session memory, and runs a multi-stage
//! contract risk review with streamed progress.
//!
//! ## Subsystems
//!
//! - **Splitting**: `第…编/章/节/条` aware segmentation with Chinese
//!   numeral normalization and bounded token estimates
//! - **Ingestion**: content-hash dedup, batched embedding with retry and
//!   dead-lettering, per-batch atomic visibility
//! - **Retrieval**: metadata-filtered exact match fused with ANN cosine
//!   search under the anti-adjacency ordering rule
//! - **Chat**: multi-backend routing with RAG grounding and persisted
//!   conversations
//! - **Review**: a `PENDING -> PROCESSING -> COMPLETED | FAILED` state
//!   machine with SSE progress fan-out and structured risk reports

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod analyzer;
pub mod backend;
pub mod chat;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod query;
pub mod render;
pub mod retrieval;
pub mod review;
pub mod runtime;
pub mod service;
pub mod split;
pub mod sse;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};

// Re-export core domain types
pub use core::{
    ChatMessage, ChatSession, ContractReview, DocCategory, Document, ReviewStatus, RiskClause,
    RiskLevel, Segment, SegmentMetadata,
};

// Re-export configuration
pub use config::CoreConfig;

// Re-export the service assembly
pub use service::{CorePorts, CoreServices};

// Re-export subsystem entry points
pub use chat::{ChatOrchestrator, ChatRequest, ChatResponse, ModelName, ModelType};
pub use embedding::{Embedder, FallbackEmbedder, cosine_similarity};
pub use index::{InMemoryIndex, MetadataFilter, VectorIndex};
pub use ingest::{IngestOutcome, IngestionCoordinator};
pub use query::{QueryAnalyzer, QueryIntent, QueryType};
pub use retrieval::{ScoredSegment, hybrid_search};
pub use review::{ProgressEvent, ReviewPipeline};
pub use split::LegalSplitter;
pub use storage::{SqliteStore, Store};
