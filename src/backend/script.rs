//! Scripted backend for tests and offline use.
//!
//! Replays a queue of canned responses. When the queue runs dry it echoes
//! a deterministic summary of the prompt, so open-ended flows keep
//! working. Records every prompt it receives for assertions.

use super::{ChatBackend, GenerateOptions, Generation, StreamChunk, TokenUsage};
use crate::core::estimate_tokens;
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Respond with this text.
    Text(String),
    /// Fail with a transient error (exercises retry paths).
    TransientError(String),
    /// Fail fatally.
    FatalError(String),
}

/// Backend that replays scripted responses.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    /// Prompt-keyed rules: first rule whose substring matches the prompt
    /// answers it. Rules are not consumed; the queue takes precedence.
    rules: Mutex<Vec<(String, ScriptedResponse)>>,
    prompts: Mutex<Vec<String>>,
    /// Delay between streamed chunks; zero by default.
    chunk_delay: Duration,
    /// Delay before each `generate` response; zero by default.
    generate_delay: Duration,
    /// Characters per streamed chunk.
    chunk_chars: usize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Creates an empty scripted backend (echo mode).
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            rules: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            chunk_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
            chunk_chars: 16,
        }
    }

    /// Creates a backend preloaded with responses.
    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        let backend = Self::new();
        if let Ok(mut queue) = backend.responses.lock() {
            queue.extend(responses);
        }
        backend
    }

    /// Sets the delay between streamed chunks (for cancellation tests).
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Sets the delay before each `generate` response (for timeout tests).
    #[must_use]
    pub const fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    /// Queues another response.
    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Adds a prompt-keyed rule: prompts containing `marker` get this
    /// response whenever the queue is empty. Useful when concurrent
    /// callers would otherwise race for queued responses.
    pub fn add_rule(&self, marker: &str, response: ScriptedResponse) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((marker.to_string(), response));
        }
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record_prompt(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }

    fn next_response(&self, prompt: &str) -> ScriptedResponse {
        if let Some(queued) = self.responses.lock().ok().and_then(|mut q| q.pop_front()) {
            return queued;
        }
        if let Ok(rules) = self.rules.lock()
            && let Some((_, response)) = rules.iter().find(|(marker, _)| prompt.contains(marker))
        {
            return response.clone();
        }
        // Echo mode: deterministic, prompt-derived.
        let preview: String = prompt.chars().take(60).collect();
        ScriptedResponse::Text(format!("[scripted] {preview}"))
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        self.record_prompt(prompt);
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        match self.next_response(prompt) {
            ScriptedResponse::Text(text) => {
                let usage = TokenUsage {
                    prompt_tokens: estimate_tokens(prompt),
                    completion_tokens: estimate_tokens(&text),
                };
                Ok(Generation {
                    text,
                    usage: Some(usage),
                })
            }
            ScriptedResponse::TransientError(message) => {
                Err(BackendError::Transient(message).into())
            }
            ScriptedResponse::FatalError(message) => Err(BackendError::Fatal(message).into()),
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.record_prompt(prompt);
        let response = self.next_response(prompt);
        let chunk_chars = self.chunk_chars;
        let chunk_delay = self.chunk_delay;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            match response {
                ScriptedResponse::Text(text) => {
                    let chars: Vec<char> = text.chars().collect();
                    for piece in chars.chunks(chunk_chars) {
                        if !chunk_delay.is_zero() {
                            tokio::time::sleep(chunk_delay).await;
                        }
                        let content: String = piece.iter().collect();
                        if tx.send(StreamChunk::Content { content }).await.is_err() {
                            return; // receiver gone
                        }
                    }
                    let _ = tx.send(StreamChunk::Complete).await;
                }
                ScriptedResponse::TransientError(message)
                | ScriptedResponse::FatalError(message) => {
                    let _ = tx.send(StreamChunk::Error { error: message }).await;
                }
            }
        });

        Ok(rx)
    }
}
