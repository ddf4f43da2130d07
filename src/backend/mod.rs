//! Chat backend port.
//!
//! The core talks to language models through [`ChatBackend`]: one-shot
//! generation plus a chunked streaming variant. The in-tree
//! [`ScriptedBackend`] replays canned responses for tests and the CLI;
//! an OpenAI-compatible remote backend is available behind the `openai`
//! feature.

mod script;

#[cfg(feature = "openai")]
mod openai;

pub use script::{ScriptedBackend, ScriptedResponse};

#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Options for a generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Model identifier, backend-specific.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token cap.
    pub max_tokens: Option<usize>,
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: usize,
    /// Tokens produced in the completion.
    pub completion_tokens: usize,
}

impl TokenUsage {
    /// Total tokens for the call.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Full response text.
    pub text: String,
    /// Usage, when the backend reports it.
    pub usage: Option<TokenUsage>,
}

/// One frame of a streamed generation. This is also the wire shape of the
/// chat SSE frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// A piece of response text.
    Content {
        /// The text delta.
        content: String,
    },
    /// Terminator frame: the stream finished normally.
    Complete,
    /// Terminal error frame; the stream closes after this.
    Error {
        /// Error description safe for clients.
        error: String,
    },
}

/// Port for chat model backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs and message metadata.
    fn name(&self) -> &'static str;

    /// Generates a complete response for the prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BackendError`] variants; `Transient` and
    /// `RateLimited` are retried by callers.
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation>;

    /// Generates a streamed response. The receiver yields `Content`
    /// chunks and ends with exactly one `Complete` or `Error` frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be started; in-stream
    /// failures arrive as an `Error` frame instead.
    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_chunk_wire_shape() {
        let chunk = StreamChunk::Content {
            content: "你好".to_string(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert_eq!(json, r#"{"type":"content","content":"你好"}"#);

        let done = serde_json::to_string(&StreamChunk::Complete).unwrap();
        assert_eq!(done, r#"{"type":"complete"}"#);

        let err = serde_json::to_string(&StreamChunk::Error {
            error: "backend down".to_string(),
        })
        .unwrap();
        assert_eq!(err, r#"{"type":"error","error":"backend down"}"#);
    }

    #[test]
    fn test_stream_chunk_round_trip() {
        let frames = [
            StreamChunk::Content {
                content: "a".to_string(),
            },
            StreamChunk::Complete,
            StreamChunk::Error {
                error: "x".to_string(),
            },
        ];
        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let back: StreamChunk = serde_json::from_str(&json).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 28,
        };
        assert_eq!(usage.total(), 128);
    }
}
