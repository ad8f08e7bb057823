//! Vendor-neutral request/response types that flow between adapters, the plugin
//! pipeline, and provider clients.
//!
//! Every vendor wire format is translated into these types at the edge (input
//! adapters) and translated back out at the edge (output adapters); nothing in the
//! pipeline or provider layer ever looks at raw vendor JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single piece of message content.
///
/// Chat-completion vendors mostly deal in plain text, but both OpenAI and Anthropic
/// support richer content arrays (image parts, tool-result blocks); representing
/// content as a list of typed blocks rather than a bare `String` lets adapters carry
/// that through without lossy flattening.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

impl Content {
    pub fn text<S: Into<String>>(s: S) -> Self {
        Content::Text { text: s.into() }
    }

    /// Best-effort plain-text view, used by adapters that only emit a flat string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A function/tool call requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A tool the model may choose to call, described by a JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single turn in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Present on `Role::Tool` messages, correlating the result with the call that
    /// produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user<S: Into<String>>(text: S) -> Self {
        Message {
            role: Role::User,
            content: vec![Content::text(text)],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Message {
            role: Role::Assistant,
            content: vec![Content::text(text)],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    /// Concatenate all text blocks, ignoring tool-use/tool-result blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The internal, vendor-neutral chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Free-form bag for fields adapters recognise but the internal model doesn't
    /// model explicitly (e.g. `top_p`, `stop`). Carried through untouched so an
    /// output adapter can re-emit them if the target vendor understands them.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// A complete, non-streaming chat-completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One increment of a streaming response.
///
/// Mirrors [`Response`] but every field is optional: a chunk may update only the
/// finish reason, only usage, or only append a content delta. The merge engine in
/// [`crate::gateway::merge`] is what folds a sequence of these back into a
/// [`Response`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Incremental content to append to `content[last_index]`, or a brand new
    /// content block if the delta carries an explicit tool-call id that hasn't been
    /// seen yet.
    #[serde(default)]
    pub delta_text: Option<String>,
    #[serde(default)]
    pub tool_call_delta: Option<ToolCallDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// An incremental fragment of a tool call.
///
/// `id` is `Some` only on the fragment that opens a new call; continuation
/// fragments carry `id: None` and are concatenated onto the most recently opened
/// call, matching how OpenAI and Anthropic both fragment tool-call arguments across
/// several chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments_fragment: String,
}
