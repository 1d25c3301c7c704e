//! Chat turn orchestration.
//!
//! One turn walks a fixed sequence of states:
//!
//! ```text
//! BUILD_CONTEXT → FIRST_MODEL_CALL → (TOOL_EXECUTION → SECOND_MODEL_CALL)? → DONE
//! ```
//!
//! Retrieval context is embedded in the system prompt; the first model call
//! is offered the tool schemas; if the model requests tool calls they are
//! executed and a second call produces the final reply. This is a strict
//! two-round protocol — tool calls in the second response are ignored, so
//! a turn can never loop.
//!
//! Retrieval and tool failures degrade the turn (empty context, error
//! payload) without aborting it; only a failed model call produces the
//! fallback reply.

use std::sync::Arc;

use crate::models::{PromptMessage, StoredMessage, TurnMetadata};
use crate::provider::{AssistantTurn, ChatProvider};
use crate::retrieval::RetrievalService;
use crate::tools::{tool_schemas, ToolRegistry};

/// Reply used when a model call fails; the real error is captured in
/// [`ChatOutcome::error`] and never shown verbatim to the end user.
const FALLBACK_REPLY: &str = "I'm having trouble right now. Please try again.";

/// Result of one chat turn. On the fallback path every flag is `None` —
/// the turn's provenance is unknown, not false.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub reply: String,
    pub used_retrieval: Option<bool>,
    pub used_tools: Option<bool>,
    pub sources: Option<Vec<String>>,
    pub error: Option<String>,
}

impl ChatOutcome {
    pub fn metadata(&self) -> TurnMetadata {
        TurnMetadata {
            used_retrieval: self.used_retrieval,
            used_tools: self.used_tools,
            sources: self.sources.clone(),
        }
    }
}

pub struct ChatOrchestrator {
    chat: Arc<dyn ChatProvider>,
    retrieval: RetrievalService,
    top_k: usize,
}

impl ChatOrchestrator {
    pub fn new(chat: Arc<dyn ChatProvider>, retrieval: RetrievalService, top_k: usize) -> Self {
        Self {
            chat,
            retrieval,
            top_k,
        }
    }

    /// Run one full turn. `history` is replayed oldest-first; `tools`
    /// carries the caller identity for this request.
    pub async fn respond(
        &self,
        user_message: &str,
        history: &[StoredMessage],
        tools: &ToolRegistry,
    ) -> ChatOutcome {
        // BUILD_CONTEXT — a retrieval failure degrades to the empty
        // placeholder rather than aborting the turn.
        let docs = match self.retrieval.search(user_message, self.top_k).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        };

        let context = RetrievalService::format_context(&docs);
        let mut messages = build_messages(&context, history, user_message);

        let mut sources: Vec<String> = Vec::new();
        for doc in &docs {
            if let Some(src) = &doc.source {
                if !sources.iter().any(|s| s == src) {
                    sources.push(src.clone());
                }
            }
        }

        // FIRST_MODEL_CALL — the model may request tool calls.
        let schemas = tool_schemas();
        let first = match self.chat.complete(&messages, Some(&schemas)).await {
            Ok(turn) => turn,
            Err(e) => return fallback(e),
        };

        let used_tools = !first.tool_calls.is_empty();

        let reply = if used_tools {
            // TOOL_EXECUTION — every requested call runs, and its result
            // is appended under the call's correlation id.
            append_tool_results(&mut messages, &first, tools).await;

            // SECOND_MODEL_CALL — no tool schemas offered; any further
            // tool requests are ignored.
            match self.chat.complete(&messages, None).await {
                Ok(turn) => turn.content.unwrap_or_default(),
                Err(e) => return fallback(e),
            }
        } else {
            first.content.unwrap_or_default()
        };

        ChatOutcome {
            reply,
            used_retrieval: Some(!docs.is_empty()),
            used_tools: Some(used_tools),
            sources: Some(sources),
            error: None,
        }
    }
}

fn fallback(error: anyhow::Error) -> ChatOutcome {
    tracing::error!("chat turn failed: {}", error);
    ChatOutcome {
        reply: FALLBACK_REPLY.to_string(),
        used_retrieval: None,
        used_tools: None,
        sources: None,
        error: Some(error.to_string()),
    }
}

/// Assemble the full message list: system prompt with embedded context,
/// bounded prior history, then the current user message.
fn build_messages(
    context: &str,
    history: &[StoredMessage],
    user_message: &str,
) -> Vec<PromptMessage> {
    let system_prompt = format!(
        "You are a helpful assistant for an events and jobs listing platform.\n\
         \n\
         Your responsibilities:\n\
         - Answer questions about how the platform works using the documentation context below\n\
         - Fetch live data (events, jobs) using the tools available to you\n\
         - Guide users who want to post events or jobs to log in first\n\
         - Be concise and accurate\n\
         \n\
         Documentation context:\n\
         {}\n\
         \n\
         Guidelines:\n\
         - Use tools when users ask for live data (events, jobs)\n\
         - Use the require_login tool when users want to post, apply, or do anything that needs an account\n\
         - If you don't know something, say so honestly\n",
        context
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(system_prompt));

    for msg in history {
        messages.push(PromptMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages.push(PromptMessage::user(user_message));
    messages
}

/// Execute the requested tool calls and append the assistant's request plus
/// one correlated result message per call.
async fn append_tool_results(
    messages: &mut Vec<PromptMessage>,
    assistant: &AssistantTurn,
    tools: &ToolRegistry,
) {
    messages.push(PromptMessage::assistant_tool_calls(
        assistant.content.clone(),
        &assistant.tool_calls,
    ));

    for tc in &assistant.tool_calls {
        // Malformed arguments degrade to an empty-argument call.
        let args: serde_json::Value =
            serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::json!({}));

        let result = tools.execute(&tc.name, &args).await;
        messages.push(PromptMessage::tool_result(&tc.id, result.to_string()));
    }
}
