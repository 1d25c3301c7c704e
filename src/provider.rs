//! Model provider abstraction and OpenAI implementations.
//!
//! Two seams, one per remote capability:
//! - [`EmbeddingProvider`] — turns text into fixed-dimension vectors.
//! - [`ChatProvider`] — one chat-completion round, optionally offered tools.
//!
//! Both are constructor dependencies of the components that use them, so
//! tests substitute deterministic fakes. The OpenAI implementations share
//! the same HTTP client and retry strategy.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::models::{PromptMessage, ToolCall};

/// Trait for embedding providers.
///
/// The dimensionality is fixed per provider instance and must match the
/// store it feeds; a mismatch is a configuration error.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// What the model returned from one completion round: optional plain-text
/// content and zero or more requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Trait for chat-completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one completion round. When `tools` is `Some`, the model may
    /// answer with tool-call requests instead of (or alongside) text.
    async fn complete(
        &self,
        messages: &[PromptMessage],
        tools: Option<&[serde_json::Value]>,
    ) -> Result<AssistantTurn>;
}

// ============ OpenAI client ============

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Shared OpenAI HTTP client backing both provider traits.
///
/// The API key is read from the `OPENAI_API_KEY` environment variable at
/// construction; a missing key fails at first use, so a server can still
/// start and report the misconfiguration through its health probe.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    config: OpenAiConfig,
}

/// Whether the language-model credential is present in the environment.
/// Reported by the health probe without constructing a client.
pub fn api_key_configured() -> bool {
    std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty())
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    /// POST a JSON body to an OpenAI endpoint with retry/backoff.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let Some(api_key) = &self.api_key else {
            bail!("OPENAI_API_KEY environment variable not set");
        };

        let url = format!("{}{}", OPENAI_BASE_URL, path);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI request failed after retries")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn dims(&self) -> usize {
        self.config.embedding_dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": texts,
        });

        let json = self.post_with_retry("/embeddings", &body).await?;
        parse_embedding_response(&json)
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        tools: Option<&[serde_json::Value]>,
    ) -> Result<AssistantTurn> {
        let mut body = serde_json::json!({
            "model": self.config.chat_model,
            "messages": messages,
        });

        if let Some(tools) = tools {
            body["tools"] = serde_json::Value::Array(tools.to_vec());
            body["tool_choice"] = serde_json::Value::String("auto".to_string());
        }

        let json = self.post_with_retry("/chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

/// Extract the `data[].embedding` arrays from an embeddings response,
/// in input order.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Extract `choices[0].message` into an [`AssistantTurn`].
fn parse_chat_response(json: &serde_json::Value) -> Result<AssistantTurn> {
    let message = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = function
                        .get("arguments")
                        .and_then(|a| a.as_str())
                        .unwrap_or("{}")
                        .to_string();
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(AssistantTurn {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [
                {"index": 0, "embedding": [0.1, 0.2]},
                {"index": 1, "embedding": [0.3, 0.4]},
            ]
        });
        let vecs = parse_embedding_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![0.1, 0.2]);
    }

    #[test]
    fn test_parse_embedding_response_missing_data() {
        let json = serde_json::json!({"error": "nope"});
        assert!(parse_embedding_response(&json).is_err());
    }

    #[test]
    fn test_parse_chat_response_plain_text() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        });
        let turn = parse_chat_response(&json).unwrap();
        assert_eq!(turn.content.as_deref(), Some("Hello!"));
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_chat_response_tool_calls() {
        let json = serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "get_latest_events", "arguments": "{}"}
                }]
            }}]
        });
        let turn = parse_chat_response(&json).unwrap();
        assert_eq!(turn.content, None);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "get_latest_events");
        assert_eq!(turn.tool_calls[0].id, "call_abc");
    }

    #[test]
    fn test_parse_chat_response_missing_choices() {
        let json = serde_json::json!({});
        assert!(parse_chat_response(&json).is_err());
    }
}
