//! OpenAI-compatible remote backend (`openai` feature).
//!
//! Works against any endpoint speaking the chat-completions protocol;
//! the base URL and model name come from [`OpenAiBackendConfig`].

use super::{ChatBackend, GenerateOptions, Generation, StreamChunk, TokenUsage};
use crate::error::{BackendError, Result};
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

/// Configuration for the remote backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendConfig {
    /// Base URL of the chat-completions endpoint.
    pub base_url: String,
    /// API key.
    pub api_key: String,
    /// Default model name.
    pub model: String,
}

/// OpenAI-compatible [`ChatBackend`].
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    default_model: String,
}

impl OpenAiBackend {
    /// Creates a backend from configuration.
    #[must_use]
    pub fn new(config: &OpenAiBackendConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(config.base_url.clone())
            .with_api_key(config.api_key.clone());
        Self {
            client: Client::with_config(openai_config),
            default_model: config.model.clone(),
        }
    }

    fn build_request(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
        stream: bool,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| BackendError::Fatal(e.to_string()))?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(opts.model.clone().unwrap_or_else(|| self.default_model.clone()))
            .messages(vec![message.into()])
            .stream(stream);
        if let Some(temperature) = opts.temperature {
            builder.temperature(temperature);
        }
        if let Some(max_tokens) = opts.max_tokens {
            builder.max_tokens(u32::try_from(max_tokens).unwrap_or(u32::MAX));
        }
        builder
            .build()
            .map_err(|e| BackendError::Fatal(e.to_string()).into())
    }
}

/// Maps client errors onto the retry classification.
fn map_error(err: &OpenAIError) -> BackendError {
    match err {
        OpenAIError::Reqwest(e) => BackendError::Transient(e.to_string()),
        OpenAIError::ApiError(api) => {
            let message = api.message.clone();
            let lowered = message.to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("rate_limit") {
                BackendError::RateLimited(message)
            } else if lowered.contains("overloaded")
                || lowered.contains("timeout")
                || lowered.contains("server error")
            {
                BackendError::Transient(message)
            } else {
                BackendError::Fatal(message)
            }
        }
        OpenAIError::StreamError(e) => BackendError::Stream(e.to_string()),
        other => BackendError::Fatal(other.to_string()),
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation> {
        let request = self.build_request(prompt, opts, false)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| map_error(&e))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens as usize,
            completion_tokens: u.completion_tokens as usize,
        });

        Ok(Generation { text, usage })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let request = self.build_request(prompt, opts, true)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| map_error(&e))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(response) => {
                        for choice in response.choices {
                            if let Some(content) = choice.delta.content
                                && !content.is_empty()
                                && tx.send(StreamChunk::Content { content }).await.is_err()
                            {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(StreamChunk::Error {
                                error: map_error(&e).to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = tx.send(StreamChunk::Complete).await;
        });

        Ok(rx)
    }
}
