//! Chat orchestration.
//!
//! Routes each request to a backend by model type, grounds answers in the
//! knowledge base, and persists the conversation. Streaming responses go
//! through a bounded channel of [`StreamChunk`]s; the user message is
//! persisted before the backend is called, and the assistant message is
//! persisted once when the stream completes — also when the client has
//! already disconnected.

pub mod prompt;

pub use prompt::{QUERY_REWRITE_PROMPT, SYSTEM_PROMPT};

use crate::backend::{ChatBackend, GenerateOptions, StreamChunk};
use crate::config::CoreConfig;
use crate::core::{
    ChatMessage, ChatSession, MessageMetadata, SourceRef, now_ts, session::derive_title,
};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::query::{QueryAnalyzer, QueryType};
use crate::retrieval::{ScoredSegment, search_with_intent};
use crate::runtime::{CallPool, RetryConfig, retry, with_deadline};
use crate::storage::SharedStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Model tier requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    /// Local model, small context window.
    Basic,
    /// Remote reasoning model.
    Advanced,
    /// Remote model with query rewriting and re-retrieval.
    AdvancedRag,
    /// Decide per query.
    #[default]
    Unified,
}

/// Concrete backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelName {
    /// The locally hosted model.
    Local,
    /// The remote reasoning model.
    Remote,
}

/// A chat request. Unknown fields are tolerated on input; only declared
/// fields are emitted on output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    /// The user message.
    pub message: String,
    /// Existing conversation to continue; a new one is created if absent.
    pub conversation_id: Option<String>,
    /// Whether to ground the answer in the knowledge base.
    pub use_knowledge_base: bool,
    /// Requested model tier.
    pub model_type: ModelType,
    /// Backend override; derived from the tier when absent.
    pub model_name: Option<ModelName>,
    /// Whether the client wants a streamed response.
    pub stream: bool,
    /// Owning user (filled by the transport layer from auth).
    pub user_id: String,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            conversation_id: None,
            use_knowledge_base: true,
            model_type: ModelType::default(),
            model_name: None,
            stream: false,
            user_id: "local".to_string(),
        }
    }
}

/// A completed chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Conversation the turn belongs to.
    pub conversation_id: String,
    /// Assistant answer.
    pub content: String,
    /// Backend that produced the answer.
    pub model: String,
    /// Retrieval sources behind the answer.
    pub sources: Vec<SourceRef>,
    /// Wall-clock duration, milliseconds.
    pub duration_ms: u64,
}

/// Handle for a streamed chat turn.
pub struct ChatStream {
    /// Conversation the stream belongs to.
    pub conversation_id: String,
    /// Chunk receiver; ends with one `Complete` or `Error` frame.
    pub receiver: mpsc::Receiver<StreamChunk>,
}

/// Resolved routing for one request.
struct Route {
    backend: Arc<dyn ChatBackend>,
    model_label: String,
    advanced: bool,
    double_retrieval: bool,
}

/// Chat orchestrator over backends, retrieval, and the session store.
pub struct ChatOrchestrator {
    config: CoreConfig,
    store: SharedStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    analyzer: QueryAnalyzer,
    local_backend: Arc<dyn ChatBackend>,
    remote_backend: Arc<dyn ChatBackend>,
    call_pool: Arc<CallPool>,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl ChatOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the query analyzer fails to build.
    pub fn new(
        config: CoreConfig,
        store: SharedStore,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        local_backend: Arc<dyn ChatBackend>,
        remote_backend: Arc<dyn ChatBackend>,
    ) -> Result<Self> {
        let call_pool = Arc::new(CallPool::new(
            "chat-backend",
            config.max_concurrent_model_calls,
            config.queue_capacity,
        ));
        Ok(Self {
            analyzer: QueryAnalyzer::new()?,
            config,
            store,
            index,
            embedder,
            local_backend,
            remote_backend,
            call_pool,
            session_locks: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Completes a chat turn, returning the full answer.
    ///
    /// # Errors
    ///
    /// Returns backend, storage, and deadline errors.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        with_deadline(self.config.chat_deadline(), self.chat_inner(request)).await
    }

    async fn chat_inner(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if request.message.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "message must not be empty".to_string(),
            });
        }

        let started = Instant::now();
        let route = self.route(request);
        let session_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Session-scoped lock: turns within one conversation serialize.
        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        let history = self.prepare_turn(request, &session_id).await?;
        let (context_block, sources) = self.gather_context(request, &route).await?;
        let prompt = prompt::assemble_prompt(
            &context_block,
            &history,
            &request.message,
            self.config.prompt_budget_tokens,
        );

        let generation = {
            let _permit = self.call_pool.acquire().await?;
            let generate_options = GenerateOptions::default();
            retry(&RetryConfig::default(), "chat-generate", || {
                route.backend.generate(&prompt, &generate_options)
            })
            .await?
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metadata = MessageMetadata {
            model: Some(route.model_label.clone()),
            sources: sources.clone(),
            tokens: generation.usage.map(|u| u.total()),
            duration_ms: Some(duration_ms),
            cancelled: false,
        };
        {
            let mut store = self.store.lock().await;
            store.append_message(&ChatMessage::assistant(
                &session_id,
                &generation.text,
                metadata,
            ))?;
        }

        Ok(ChatResponse {
            conversation_id: session_id,
            content: generation.text,
            model: route.model_label,
            sources,
            duration_ms,
        })
    }

    /// Starts a streamed chat turn. Generation and persistence continue in
    /// the background even if the returned receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns storage errors from turn preparation; backend errors after
    /// the stream starts arrive as an `Error` frame.
    pub async fn chat_stream(self: &Arc<Self>, request: ChatRequest) -> Result<ChatStream> {
        if request.message.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "message must not be empty".to_string(),
            });
        }

        let started = Instant::now();
        let route = self.route(&request);
        let session_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let lock = self.session_lock(&session_id);
        let guard = lock.lock_owned().await;

        let history = self.prepare_turn(&request, &session_id).await?;
        let (context_block, sources) = self.gather_context(&request, &route).await?;
        let prompt = prompt::assemble_prompt(
            &context_block,
            &history,
            &request.message,
            self.config.prompt_budget_tokens,
        );

        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.cancel_tokens.lock() {
            tokens.insert(session_id.clone(), token.clone());
        }

        let (tx, rx) = mpsc::channel::<StreamChunk>(64);
        let this = Arc::clone(self);
        let stream_session = session_id.clone();
        tokio::spawn(async move {
            let _guard = guard; // released when the turn fully persists
            this.run_stream(
                &stream_session,
                &route,
                &prompt,
                sources,
                token,
                tx,
                started,
            )
            .await;
            if let Ok(mut tokens) = this.cancel_tokens.lock() {
                tokens.remove(&stream_session);
            }
        });

        Ok(ChatStream {
            conversation_id: session_id,
            receiver: rx,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stream(
        &self,
        session_id: &str,
        route: &Route,
        prompt: &str,
        sources: Vec<SourceRef>,
        token: CancellationToken,
        tx: mpsc::Sender<StreamChunk>,
        started: Instant,
    ) {
        let permit = match self.call_pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                let _ = tx.send(StreamChunk::Error { error: e.to_string() }).await;
                return;
            }
        };

        let mut backend_rx = match route
            .backend
            .generate_stream(prompt, &GenerateOptions::default())
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to start stream");
                let _ = tx.send(StreamChunk::Error { error: e.to_string() }).await;
                return;
            }
        };

        let mut buffer = String::new();
        let mut client_gone = false;
        let mut cancelled = false;
        let mut failed = false;

        loop {
            let chunk = tokio::select! {
                () = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = backend_rx.recv() => chunk,
            };

            match chunk {
                Some(StreamChunk::Content { content }) => {
                    buffer.push_str(&content);
                    if !client_gone
                        && tx.send(StreamChunk::Content { content }).await.is_err()
                    {
                        // Client disconnected: keep generating to completion.
                        client_gone = true;
                    }
                }
                Some(StreamChunk::Complete) | None => break,
                Some(StreamChunk::Error { error }) => {
                    tracing::error!(session_id, error = %error, "stream failed");
                    failed = true;
                    if !client_gone {
                        let _ = tx.send(StreamChunk::Error { error }).await;
                    }
                    break;
                }
            }
        }
        drop(permit);

        if failed {
            return;
        }

        // Persist the buffered assistant text once; partial text carries
        // the cancelled flag.
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metadata = MessageMetadata {
            model: Some(route.model_label.clone()),
            sources,
            tokens: None,
            duration_ms: Some(duration_ms),
            cancelled,
        };
        {
            let mut store = self.store.lock().await;
            if let Err(e) =
                store.append_message(&ChatMessage::assistant(session_id, &buffer, metadata))
            {
                tracing::error!(session_id, error = %e, "failed to persist assistant message");
            }
        }

        if cancelled {
            if !client_gone {
                let _ = tx
                    .send(StreamChunk::Error {
                        error: "cancelled".to_string(),
                    })
                    .await;
            }
        } else if !client_gone {
            let _ = tx.send(StreamChunk::Complete).await;
        }
    }

    /// Cancels an in-flight stream for the conversation, if any. The
    /// stream stops at the next chunk boundary and persists partial text
    /// with `cancelled = true`.
    pub fn cancel(&self, conversation_id: &str) {
        if let Ok(tokens) = self.cancel_tokens.lock()
            && let Some(token) = tokens.get(conversation_id)
        {
            token.cancel();
        }
    }

    /// Lists a user's sessions.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let store = self.store.lock().await;
        store.list_sessions(user_id)
    }

    /// Loads a session with its full message history.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the session does not exist.
    pub async fn get_session(&self, id: &str) -> Result<(ChatSession, Vec<ChatMessage>)> {
        let store = self.store.lock().await;
        let session = store.get_session(id)?.ok_or_else(|| {
            crate::error::StorageError::SessionNotFound { id: id.to_string() }
        })?;
        let messages = store.get_messages(id, 0)?;
        Ok((session, messages))
    }

    /// Deletes a session and its messages.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        store.delete_session(id)
    }

    /// Loads or creates the session, persists the user message, and
    /// returns the recalled history (without the new message).
    async fn prepare_turn(
        &self,
        request: &ChatRequest,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let advanced = self.route(request).advanced;
        let window = self.config.history_window(advanced);

        let mut store = self.store.lock().await;
        if store.get_session(session_id)?.is_none() {
            let now = now_ts();
            store.create_session(&ChatSession {
                id: session_id.to_string(),
                user_id: request.user_id.clone(),
                title: derive_title(&request.message),
                created_at: now,
                updated_at: now,
            })?;
        }

        let history = store.get_messages(session_id, window * 2)?;
        // Persist the user message before the backend call so it survives
        // generation failures.
        store.append_message(&ChatMessage::user(session_id, &request.message))?;
        Ok(history)
    }

    /// Runs retrieval (single or double) and formats the context block.
    async fn gather_context(
        &self,
        request: &ChatRequest,
        route: &Route,
    ) -> Result<(String, Vec<SourceRef>)> {
        if !request.use_knowledge_base {
            return Ok((String::new(), Vec::new()));
        }

        let k = self.config.default_top_k;
        let mut results = self.retrieve(&request.message, k).await?;

        if route.double_retrieval {
            // Query rewriting, then a second pass; merged deterministically.
            let rewritten = self.rewrite_query(route, &request.message).await;
            if let Some(rewritten) = rewritten
                && rewritten != request.message
            {
                let second = self.retrieve(&rewritten, k).await?;
                results = merge_results(results, second, k);
            }
        }

        let mut titles = Vec::with_capacity(results.len());
        {
            let store = self.store.lock().await;
            for result in &results {
                let title = store
                    .get_document(&result.segment.document_id)?
                    .map_or_else(|| "未知文档".to_string(), |d| d.title);
                titles.push(title);
            }
        }

        let sources = results
            .iter()
            .zip(&titles)
            .map(|(result, title)| SourceRef {
                title: title.clone(),
                article_number: result.segment.metadata.article_number.clone(),
            })
            .collect();
        Ok((prompt::build_context_block(&results, &titles), sources))
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredSegment>> {
        let intent = self.analyzer.analyze(query);
        let store = self.store.lock().await;
        search_with_intent(
            store.as_ref(),
            self.index.as_ref(),
            self.embedder.as_ref(),
            &intent,
            k,
        )
    }

    /// Rewrites the query through the backend; failures fall back to the
    /// original query.
    async fn rewrite_query(&self, route: &Route, message: &str) -> Option<String> {
        let prompt = format!("{QUERY_REWRITE_PROMPT}{message}");
        let permit = self.call_pool.acquire().await.ok()?;
        let result = route
            .backend
            .generate(&prompt, &GenerateOptions::default())
            .await;
        drop(permit);
        match result {
            Ok(generation) => {
                let rewritten = generation.text.trim().to_string();
                (!rewritten.is_empty()).then_some(rewritten)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query rewrite failed; using original query");
                None
            }
        }
    }

    /// Resolves routing for a request.
    fn route(&self, request: &ChatRequest) -> Route {
        let effective = match request.model_type {
            ModelType::Unified => {
                let long = request.message.chars().count() > self.config.unified_threshold_chars;
                let open_semantic = self.analyzer.analyze(&request.message).query_type
                    == QueryType::Semantic
                    && prompt::is_open_ended(&request.message);
                if long || open_semantic {
                    ModelType::AdvancedRag
                } else {
                    ModelType::Advanced
                }
            }
            other => other,
        };

        let name = request.model_name.unwrap_or(match effective {
            ModelType::Basic => ModelName::Local,
            _ => ModelName::Remote,
        });
        let backend = match name {
            ModelName::Local => Arc::clone(&self.local_backend),
            ModelName::Remote => Arc::clone(&self.remote_backend),
        };

        Route {
            model_label: format!("{}:{}", backend.name(), match effective {
                ModelType::Basic => "basic",
                ModelType::Advanced => "advanced",
                ModelType::AdvancedRag => "advanced-rag",
                ModelType::Unified => "unified",
            }),
            backend,
            advanced: effective != ModelType::Basic,
            double_retrieval: effective == ModelType::AdvancedRag,
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let Ok(mut locks) = self.session_locks.lock() else {
            return Arc::new(tokio::sync::Mutex::new(()));
        };
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// Merges two retrieval passes, deduplicating by segment id and keeping
/// the higher score; deterministic ordering.
fn merge_results(
    first: Vec<ScoredSegment>,
    second: Vec<ScoredSegment>,
    k: usize,
) -> Vec<ScoredSegment> {
    let mut by_id: HashMap<Option<i64>, ScoredSegment> = HashMap::new();
    for result in first.into_iter().chain(second) {
        match by_id.entry(result.segment.id) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if result.score > slot.get().score {
                    slot.insert(result);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }
    let mut merged: Vec<ScoredSegment> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.segment.id.cmp(&b.segment.id))
    });
    merged.truncate(k);
    merged
}
