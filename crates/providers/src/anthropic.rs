//! Anthropic native completion client.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events

use arena_core::completion::{
    ChunkReceiver, Completion, CompletionClient, CompletionRequest, StreamChunk, Usage,
};
use arena_core::error::ProviderError;
use arena_core::message::{Message, Role};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic Messages API client.
pub struct AnthropicClient {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Merge the request's system instruction with any system-role messages.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system<'a>(
        instruction: &str,
        messages: &'a [Message],
    ) -> (Option<String>, Vec<&'a Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        if !instruction.is_empty() {
            system_parts.push(instruction);
        }
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.system, &request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "metadata": { "user_id": request.session_id },
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    fn to_completion(resp: AnthropicResponse) -> Completion {
        let text = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<String>();

        Completion {
            text,
            usage: resp.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(
            provider = "anthropic",
            model = %request.model,
            session = %request.session_id,
            "Sending completion request"
        );

        let response = self.send(&body, false).await?;

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::to_completion(api_resp))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(
            provider = "anthropic",
            model = %request.model,
            session = %request.session_id,
            "Sending streaming request"
        );

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                lines.push(&bytes);

                while let Some(line) = lines.next_line() {
                    match decoder.feed_line(&line) {
                        Decoded::Nothing => {}
                        Decoded::Chunk(chunk) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() || done {
                                return;
                            }
                        }
                        Decoded::Failed(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }

            // Body ended without message_stop
            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// What one SSE line turned into.
#[derive(Debug)]
enum Decoded {
    Nothing,
    Chunk(StreamChunk),
    Failed(ProviderError),
}

/// Raw body bytes split into lines. Bytes are only decoded once a whole
/// line has arrived, so a character split across reads stays intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

/// Line-oriented decoder for the Messages streaming format.
///
/// Input tokens arrive on `message_start`, output tokens on `message_delta`;
/// both are reported on the final chunk.
#[derive(Debug, Default)]
struct SseDecoder {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl SseDecoder {
    fn feed_line(&mut self, line: &str) -> Decoded {
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            return Decoded::Nothing;
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Decoded::Nothing;
        };
        let data = data.trim();
        if data.is_empty() {
            return Decoded::Nothing;
        }

        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Decoded::Nothing;
            }
        };

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = Some(input as u32);
                }
                Decoded::Nothing
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match (delta["type"].as_str(), delta["text"].as_str()) {
                    (Some("text_delta"), Some(text)) if !text.is_empty() => {
                        Decoded::Chunk(StreamChunk {
                            content: Some(text.to_string()),
                            done: false,
                            usage: None,
                        })
                    }
                    _ => Decoded::Nothing,
                }
            }
            "message_delta" => {
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = Some(output as u32);
                }
                Decoded::Nothing
            }
            "message_stop" => Decoded::Chunk(StreamChunk {
                content: None,
                done: true,
                usage: self.usage(),
            }),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string();
                Decoded::Failed(ProviderError::StreamInterrupted(message))
            }
            _ => Decoded::Nothing,
        }
    }

    fn usage(&self) -> Option<Usage> {
        match (self.input_tokens, self.output_tokens) {
            (Some(input_tokens), Some(output_tokens)) => Some(Usage {
                input_tokens,
                output_tokens,
            }),
            _ => None,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
