//! Core data models used throughout the assistant.
//!
//! These types represent the knowledge chunks, retrieval results, chat
//! turns, and tool calls that flow through the ingestion and chat pipeline.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A unit of retrievable knowledge-base text, stored with its embedding.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source: Option<String>,
    pub created_at: i64,
}

/// One ranked retrieval hit. Ephemeral: only the source labels survive the
/// turn, in [`TurnMetadata`].
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: Option<String>,
    pub similarity: f32,
}

/// Role of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => bail!("Unknown message role: {}", other),
        }
    }
}

/// Per-turn provenance persisted alongside assistant messages.
///
/// All fields are `None` for user turns and for assistant turns produced by
/// the fallback path, where the flags are unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_retrieval: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

/// A message as stored in (and replayed from) the session store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
    pub created_at: i64,
}

/// One row of the admin session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<i64>,
    pub created_at: i64,
    pub message_count: i64,
}

/// A tool invocation requested by the model. `id` correlates the tool
/// result back to the request; `arguments` is the raw JSON string as sent.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Authenticated caller identity threaded into tool execution. Nullable at
/// every call site; no tool currently enforces it.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub id: i64,
}

/// A message in the wire format the chat model consumes.
///
/// Covers all four shapes the protocol needs: system/user turns, an
/// assistant turn that requested tool calls, and a correlated tool result.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// OpenAI wire encoding of a requested tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionPayload {
    pub name: String,
    pub arguments: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// The assistant turn that carried tool-call requests. `content` is
    /// whatever text accompanied the calls, often absent.
    pub fn assistant_tool_calls(content: Option<String>, calls: &[ToolCall]) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(
                calls
                    .iter()
                    .map(|tc| ToolCallPayload {
                        id: tc.id.clone(),
                        kind: "function".to_string(),
                        function: FunctionPayload {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        }
    }

    /// A tool result correlated back to its request by `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}
