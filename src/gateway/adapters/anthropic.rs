//! Anthropic Messages API wire format: a top-level `system` string instead of a
//! system message, content-block arrays instead of flat strings, and a
//! multi-event SSE lifecycle (`message_start` / `content_block_start` /
//! `content_block_delta` / `content_block_stop` / `message_delta` /
//! `message_stop`) instead of one event type per chunk.

use crate::gateway::adapters::{custom_metadata, InputAdapter, OutputAdapter, SseFrame, StreamFramer};
use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Content, FinishReason, Message, Request, Response, Role};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

pub struct AnthropicAdapter;

#[derive(Debug, Deserialize)]
struct WireRequest {
    model: String,
    #[serde(default)]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(default)]
    tools: Vec<WireTool>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_schema")]
    input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}})
}

/// Anthropic messages carry only `user`/`assistant` roles; the system prompt
/// arrives in the top-level `system` field. A request with `system` set becomes a
/// synthetic leading `Role::System` message so the internal model has a single
/// place to look for priming context regardless of vendor.
fn content_blocks_from_wire(value: &serde_json::Value) -> Vec<Content> {
    match value {
        serde_json::Value::String(s) => vec![Content::text(s.clone())],
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b.get("type").and_then(|t| t.as_str()) {
                Some("text") => b.get("text").and_then(|t| t.as_str()).map(Content::text),
                Some("tool_result") => {
                    let tool_use_id = b.get("tool_use_id")?.as_str()?.to_string();
                    let content = b
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Some(Content::ToolResult { tool_use_id, content, is_error: false })
                }
                Some("tool_use") => {
                    let id = b.get("id")?.as_str()?.to_string();
                    let name = b.get("name")?.as_str()?.to_string();
                    let input = b.get("input").cloned().unwrap_or(json!({}));
                    Some(Content::ToolUse { id, name, input })
                }
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

impl InputAdapter for AnthropicAdapter {
    fn parse_request(&self, body: &[u8]) -> Result<Request, GatewayError> {
        let wire: WireRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InputInvalid(format!("invalid Anthropic request body: {}", e)))?;

        let max_tokens = wire
            .max_tokens
            .ok_or_else(|| GatewayError::InputInvalid("max_tokens is required".to_string()))?;

        let mut messages = Vec::with_capacity(wire.messages.len() + 1);
        if let Some(system) = &wire.system {
            messages.push(Message {
                role: Role::System,
                content: vec![Content::text(system.clone())],
                tool_calls: vec![],
                tool_call_id: None,
            });
        }

        for m in &wire.messages {
            let role = if m.role == "assistant" { Role::Assistant } else { Role::User };
            let blocks = content_blocks_from_wire(&m.content);

            let tool_calls = blocks
                .iter()
                .filter_map(|b| match b {
                    Content::ToolUse { id, name, input } => Some(crate::gateway::model::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>();

            let tool_call_id = blocks.iter().find_map(|b| match b {
                Content::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            });

            let role = if tool_call_id.is_some() { Role::Tool } else { role };

            messages.push(Message {
                role,
                content: blocks.into_iter().filter(|b| matches!(b, Content::Text { .. })).collect(),
                tool_calls,
                tool_call_id,
            });
        }

        let tools = wire
            .tools
            .into_iter()
            .map(|t| crate::gateway::model::Tool {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect();

        let mut extra = wire.extra;
        extra.insert("original_provider".to_string(), json!("anthropic"));

        Ok(Request {
            model: wire.model,
            messages,
            tools,
            stream: wire.stream,
            temperature: wire.temperature,
            max_tokens: Some(max_tokens),
            system: wire.system,
            extra,
        })
    }
}

fn finish_reason_to_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "stop_sequence",
    }
}

fn content_blocks_to_wire(message: &Message) -> Vec<serde_json::Value> {
    let mut blocks: Vec<serde_json::Value> = message
        .content
        .iter()
        .filter_map(Content::as_text)
        .map(|t| json!({"type": "text", "text": t}))
        .collect();

    for tc in &message.tool_calls {
        blocks.push(json!({"type": "tool_use", "id": tc.id, "name": tc.name, "input": tc.arguments}));
    }
    blocks
}

impl OutputAdapter for AnthropicAdapter {
    fn format_response(&self, internal_request: &Request, _raw_request: &[u8], response: &Response) -> serde_json::Value {
        let mut wire = json!({
            "id": response.id,
            "type": "message",
            "role": "assistant",
            "model": response.model,
            "content": content_blocks_to_wire(&response.message),
            "stop_reason": response.finish_reason.map(finish_reason_to_stop_reason),
            "usage": {
                "input_tokens": response.usage.map(|u| u.prompt_tokens).unwrap_or(0),
                "output_tokens": response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            },
        });
        if let Some(custom) = custom_metadata(internal_request, "anthropic") {
            wire["metadata"] = json!({"custom": custom});
        }
        wire
    }

    fn new_stream_framer(&self) -> Box<dyn StreamFramer> {
        Box::new(AnthropicStreamFramer::new())
    }
}

/// Tracks which content-block index is open so a run of text deltas shares one
/// `content_block_start`/`_stop` pair, and a tool-call delta opens its own block.
struct AnthropicStreamFramer {
    started: bool,
    current_block: Option<BlockKind>,
    next_index: u32,
    message_id: Option<String>,
    model: Option<String>,
    final_finish_reason: Option<FinishReason>,
}

#[derive(PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
}

impl AnthropicStreamFramer {
    fn new() -> Self {
        AnthropicStreamFramer {
            started: false,
            current_block: None,
            next_index: 0,
            message_id: None,
            model: None,
            final_finish_reason: None,
        }
    }

    fn open_block(&mut self, kind: BlockKind, opener: serde_json::Value) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if let Some(existing) = &self.current_block {
            if *existing != kind {
                frames.push(self.close_current_block());
            }
        }
        if self.current_block.is_none() {
            frames.push(SseFrame {
                event: Some("content_block_start"),
                data: json!({"type": "content_block_start", "index": self.next_index, "content_block": opener}),
            });
            self.current_block = Some(kind);
        }
        frames
    }

    fn close_current_block(&mut self) -> SseFrame {
        let index = self.next_index;
        self.current_block = None;
        self.next_index += 1;
        SseFrame { event: Some("content_block_stop"), data: json!({"type": "content_block_stop", "index": index}) }
    }
}

impl StreamFramer for AnthropicStreamFramer {
    fn frames_for_chunk(
        &mut self,
        _internal_request: &Request,
        _raw_request: &[u8],
        chunk: &Chunk,
        _first_chunk: bool,
        _final_chunk: bool,
        _accumulated: &Response,
    ) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        if let Some(id) = &chunk.id {
            self.message_id = Some(id.clone());
        }
        if let Some(model) = &chunk.model {
            self.model = Some(model.clone());
        }

        if !self.started {
            self.started = true;
            frames.push(SseFrame {
                event: Some("message_start"),
                data: json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id.clone().unwrap_or_default(),
                        "type": "message",
                        "role": "assistant",
                        "model": self.model.clone().unwrap_or_default(),
                        "content": [],
                        "stop_reason": serde_json::Value::Null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    }
                }),
            });
        }

        if let Some(text) = &chunk.delta_text {
            frames.extend(self.open_block(BlockKind::Text, json!({"type": "text", "text": ""})));
            frames.push(SseFrame {
                event: Some("content_block_delta"),
                data: json!({
                    "type": "content_block_delta",
                    "index": self.next_index,
                    "delta": {"type": "text_delta", "text": text},
                }),
            });
        }

        if let Some(tcd) = &chunk.tool_call_delta {
            if tcd.id.is_some() {
                frames.extend(self.open_block(
                    BlockKind::ToolUse,
                    json!({"type": "tool_use", "id": tcd.id, "name": tcd.name}),
                ));
            }
            frames.push(SseFrame {
                event: Some("content_block_delta"),
                data: json!({
                    "type": "content_block_delta",
                    "index": self.next_index,
                    "delta": {"type": "input_json_delta", "partial_json": tcd.arguments_fragment},
                }),
            });
        }

        if let Some(reason) = chunk.finish_reason {
            self.final_finish_reason = Some(reason);
        }

        frames
    }

    fn closing_frames(&mut self, _internal_request: &Request, _raw_request: &[u8], _accumulated: &Response) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.current_block.is_some() {
            frames.push(self.close_current_block());
        }
        frames.push(SseFrame {
            event: Some("message_delta"),
            data: json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": self.final_finish_reason.map(finish_reason_to_stop_reason),
                },
            }),
        });
        frames.push(SseFrame { event: Some("message_stop"), data: json!({"type": "message_stop"}) });
        frames
    }
}
