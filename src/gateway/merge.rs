//! Folds a sequence of streaming [`Chunk`]s into the running [`Response`] shape so
//! plugins that only know how to inspect a complete response (and callers that
//! want a final usage total) can observe streaming traffic too.
//!
//! The merge rules, applied per incoming chunk:
//! - `id`/`model`: incoming wins when present, otherwise the accumulated value is
//!   kept.
//! - `usage`: last non-null wins, and `total_tokens` is recomputed from
//!   `prompt_tokens + completion_tokens` rather than trusted verbatim, since some
//!   vendors omit it on intermediate chunks.
//! - `finish_reason`: first non-null wins — once a vendor commits to a reason it
//!   does not change it on a later chunk, but treating it as "first wins" is robust
//!   to vendors that repeat it on every remaining chunk.
//! - text deltas: appended to the last text content block, or start a new one if
//!   there isn't one yet.
//! - tool-call deltas: a fragment carrying `id: Some(..)` opens a new call; a
//!   fragment with `id: None` concatenates its `arguments_fragment` onto the most
//!   recently opened call.

use crate::gateway::model::{Chunk, Content, FinishReason, Message, Response, Role, ToolCall, Usage};

/// Accumulates a stream of [`Chunk`]s for a single response.
#[derive(Debug, Clone)]
pub struct StreamMerger {
    id: Option<String>,
    model: Option<String>,
    text: String,
    pending_tool_calls: Vec<PendingToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamMerger {
    pub fn new() -> Self {
        StreamMerger {
            id: None,
            model: None,
            text: String::new(),
            pending_tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Fold one chunk into the running state.
    pub fn merge(&mut self, chunk: &Chunk) {
        if let Some(id) = &chunk.id {
            self.id = Some(id.clone());
        }
        if let Some(model) = &chunk.model {
            self.model = Some(model.clone());
        }
        if let Some(text) = &chunk.delta_text {
            self.text.push_str(text);
        }
        if let Some(delta) = &chunk.tool_call_delta {
            match &delta.id {
                Some(id) => self.pending_tool_calls.push(PendingToolCall {
                    id: id.clone(),
                    name: delta.name.clone().unwrap_or_default(),
                    arguments: delta.arguments_fragment.clone(),
                }),
                None => {
                    if let Some(last) = self.pending_tool_calls.last_mut() {
                        last.arguments.push_str(&delta.arguments_fragment);
                    }
                }
            }
        }
        if self.finish_reason.is_none() {
            self.finish_reason = chunk.finish_reason;
        }
        if let Some(usage) = chunk.usage {
            let mut merged = self.usage.unwrap_or(Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 });
            if usage.prompt_tokens != 0 {
                merged.prompt_tokens = usage.prompt_tokens;
            }
            if usage.completion_tokens != 0 {
                merged.completion_tokens = usage.completion_tokens;
            }
            merged.total_tokens = merged.prompt_tokens + merged.completion_tokens;
            self.usage = Some(merged);
        }
    }

    /// Build the [`Response`] the accumulated chunks represent so far. Callable
    /// mid-stream (e.g. for logging) or once the stream has ended.
    pub fn finalize(&self) -> Response {
        let mut content = Vec::new();
        if !self.text.is_empty() || self.pending_tool_calls.is_empty() {
            content.push(Content::text(self.text.clone()));
        }

        let tool_calls: Vec<ToolCall> = self
            .pending_tool_calls
            .iter()
            .map(|p| ToolCall {
                id: p.id.clone(),
                name: p.name.clone(),
                arguments: serde_json::from_str(&p.arguments)
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
            })
            .collect();

        Response {
            id: self.id.clone().unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            message: Message {
                role: Role::Assistant,
                content,
                tool_calls,
                tool_call_id: None,
            },
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

impl Default for StreamMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::ToolCallDelta;

    fn text_chunk(s: &str) -> Chunk {
        Chunk { delta_text: Some(s.to_string()), ..Default::default() }
    }

    #[test]
    fn concatenates_text_deltas_in_order() {
        let mut merger = StreamMerger::new();
        merger.merge(&text_chunk("Hello"));
        merger.merge(&text_chunk(", "));
        merger.merge(&text_chunk("world"));
        let resp = merger.finalize();
        assert_eq!(resp.message.text(), "Hello, world");
    }

    #[test]
    fn first_finish_reason_wins() {
        let mut merger = StreamMerger::new();
        merger.merge(&Chunk { finish_reason: Some(FinishReason::Stop), ..Default::default() });
        merger.merge(&Chunk { finish_reason: Some(FinishReason::Length), ..Default::default() });
        assert_eq!(merger.finalize().finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn usage_recomputes_total_from_last_non_null() {
        let mut merger = StreamMerger::new();
        merger.merge(&Chunk {
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 0, total_tokens: 999 }),
            ..Default::default()
        });
        merger.merge(&Chunk {
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 0 }),
            ..Default::default()
        });
        let usage = merger.finalize().usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn a_later_chunk_carrying_only_completion_tokens_keeps_the_earlier_prompt_tokens() {
        let mut merger = StreamMerger::new();
        merger.merge(&Chunk {
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 0, total_tokens: 10 }),
            ..Default::default()
        });
        merger.merge(&Chunk {
            usage: Some(Usage { prompt_tokens: 0, completion_tokens: 5, total_tokens: 5 }),
            ..Default::default()
        });
        let usage = merger.finalize().usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn tool_call_fragments_concatenate_by_presence_of_id() {
        let mut merger = StreamMerger::new();
        merger.merge(&Chunk {
            tool_call_delta: Some(ToolCallDelta {
                id: Some("call_1".to_string()),
                name: Some("lookup".to_string()),
                arguments_fragment: "{\"q\":".to_string(),
            }),
            ..Default::default()
        });
        merger.merge(&Chunk {
            tool_call_delta: Some(ToolCallDelta {
                id: None,
                name: None,
                arguments_fragment: "\"rust\"}".to_string(),
            }),
            ..Default::default()
        });
        let resp = merger.finalize();
        assert_eq!(resp.message.tool_calls.len(), 1);
        assert_eq!(resp.message.tool_calls[0].name, "lookup");
        assert_eq!(resp.message.tool_calls[0].arguments["q"], "rust");
    }

    #[test]
    fn two_consecutive_tool_calls_stay_separate() {
        let mut merger = StreamMerger::new();
        merger.merge(&Chunk {
            tool_call_delta: Some(ToolCallDelta {
                id: Some("call_1".to_string()),
                name: Some("a".to_string()),
                arguments_fragment: "{}".to_string(),
            }),
            ..Default::default()
        });
        merger.merge(&Chunk {
            tool_call_delta: Some(ToolCallDelta {
                id: Some("call_2".to_string()),
                name: Some("b".to_string()),
                arguments_fragment: "{}".to_string(),
            }),
            ..Default::default()
        });
        assert_eq!(merger.finalize().message.tool_calls.len(), 2);
    }
}
