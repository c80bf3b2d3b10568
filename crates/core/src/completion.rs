//! CompletionClient trait: the abstraction over generative text backends.
//!
//! A client knows how to send a message set to an LLM and get a response
//! back, either as a complete text or as a stream of text fragments whose
//! concatenation equals the same completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, transcript};
use crate::tokens;

/// One request to the completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "claude-sonnet-4-5-20250929")
    pub model: String,

    /// Ordered, role-tagged messages
    pub messages: Vec<Message>,

    /// System instruction sent alongside the messages
    pub system: String,

    /// Session identifier, `<battle>_<agent>_<iteration>`
    pub session_id: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub text: String,

    /// Token usage as reported by the provider, if it reported any
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Where a token count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Provider,
    Estimated,
}

/// Resolve the token usage for one call: provider numbers when present,
/// otherwise the whitespace estimate over prompt and response.
pub fn resolve_usage(
    reported: Option<Usage>,
    messages: &[Message],
    response: &str,
) -> (Usage, TokenSource) {
    match reported {
        Some(usage) => (usage, TokenSource::Provider),
        None => {
            let (input_tokens, output_tokens) =
                tokens::estimate_exchange(&transcript(messages), response);
            (
                Usage {
                    input_tokens,
                    output_tokens,
                },
                TokenSource::Estimated,
            )
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only near the end of the stream)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiver side of a streaming completion.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core completion client trait.
///
/// The orchestrator calls `complete()` or `stream()` without knowing which
/// provider is behind it.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for this client (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// The stream is finite and cannot be restarted. Default implementation
    /// calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.text),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CompletionClient for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<Completion, ProviderError> {
            Ok(Completion {
                text: request.messages[0].content.clone(),
                usage: None,
                model: request.model,
            })
        }
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            model: "echo-1".into(),
            messages: vec![Message::user(text)],
            system: String::new(),
            session_id: "b_traditional_1".into(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let mut rx = Echo.stream(request("const x = 1;")).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("const x = 1;"));
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn reported_usage_wins() {
        let reported = Usage {
            input_tokens: 12,
            output_tokens: 30,
        };
        let (usage, source) = resolve_usage(Some(reported), &[Message::user("a b")], "c");
        assert_eq!(usage.total(), 42);
        assert_eq!(source, TokenSource::Provider);
    }

    #[test]
    fn missing_usage_is_estimated_on_both_sides() {
        // "USER: one two three" is 4 words -> 5; "four five" -> 2
        let (usage, source) =
            resolve_usage(None, &[Message::user("one two three")], "four five");
        assert_eq!(source, TokenSource::Estimated);
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 2);
    }

    #[test]
    fn estimated_total_is_not_rounded_per_side() {
        // "USER: one two" + "four five" = 5 words -> 6 tokens
        let (usage, _) = resolve_usage(None, &[Message::user("one two")], "four five");
        assert_eq!(usage.total(), 6);
    }
}
