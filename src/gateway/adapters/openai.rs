//! OpenAI Chat Completions wire format: request body shape, `choices[]`-wrapped
//! responses, and `data: {...}\n\n` SSE framing terminated by a literal
//! `data: [DONE]\n\n`.

use crate::gateway::adapters::{custom_metadata, InputAdapter, OutputAdapter, SseFrame, StreamFramer};
use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Content, FinishReason, Message, Request, Response, Role, ToolCall};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

pub struct OpenAiAdapter;

#[derive(Debug, Deserialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    tools: Vec<WireTool>,
    /// Accepted and folded into `extra["tool_choice"]` rather than modelled
    /// explicitly — the internal [`Request`] has no notion of tool-choice
    /// strategy, only the candidate tool list.
    #[serde(default)]
    tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireTool {
    function: WireFunctionDef,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_schema")]
    parameters: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}})
}

fn role_from_wire(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn content_blocks_from_wire(value: Option<serde_json::Value>) -> Vec<Content> {
    match value {
        Some(serde_json::Value::String(s)) => vec![Content::text(s)],
        Some(serde_json::Value::Array(parts)) => parts
            .into_iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()).map(Content::text))
            .collect(),
        _ => vec![],
    }
}

impl InputAdapter for OpenAiAdapter {
    fn parse_request(&self, body: &[u8]) -> Result<Request, GatewayError> {
        let wire: WireRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InputInvalid(format!("invalid OpenAI request body: {}", e)))?;

        let messages = wire
            .messages
            .into_iter()
            .map(|m| Message {
                role: role_from_wire(&m.role),
                content: content_blocks_from_wire(m.content),
                tool_calls: m
                    .tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or_else(|_| json!({})),
                    })
                    .collect(),
                tool_call_id: m.tool_call_id,
            })
            .collect();

        let tools = wire
            .tools
            .into_iter()
            .map(|t| crate::gateway::model::Tool {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect();

        let mut extra = wire.extra;
        if let Some(tool_choice) = wire.tool_choice {
            extra.insert("tool_choice".to_string(), tool_choice);
        }
        extra.insert("original_provider".to_string(), json!("openai"));

        Ok(Request {
            model: wire.model,
            messages,
            tools,
            stream: wire.stream,
            temperature: wire.temperature,
            max_tokens: wire.max_tokens,
            system: None,
            extra,
        })
    }
}

fn finish_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

fn message_to_wire(message: &Message) -> serde_json::Value {
    if message.tool_calls.is_empty() {
        json!({"role": "assistant", "content": message.text()})
    } else {
        let tool_calls: Vec<serde_json::Value> = message
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": serde_json::to_string(&tc.arguments).unwrap_or_else(|_| "{}".to_string()),
                    }
                })
            })
            .collect();
        json!({"role": "assistant", "content": serde_json::Value::Null, "tool_calls": tool_calls})
    }
}

impl OutputAdapter for OpenAiAdapter {
    fn format_response(&self, internal_request: &Request, _raw_request: &[u8], response: &Response) -> serde_json::Value {
        let mut wire = json!({
            "id": response.id,
            "object": "chat.completion",
            "model": response.model,
            "choices": [{
                "index": 0,
                "message": message_to_wire(&response.message),
                "finish_reason": response.finish_reason.map(finish_reason_to_wire),
            }],
            "usage": response.usage.map(|u| json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })),
        });
        if let Some(custom) = custom_metadata(internal_request, "openai") {
            wire["metadata"] = json!({"custom": custom});
        }
        wire
    }

    fn new_stream_framer(&self) -> Box<dyn StreamFramer> {
        Box::new(OpenAiStreamFramer)
    }

    fn done_sentinel(&self) -> Option<&'static str> {
        Some("[DONE]")
    }
}

struct OpenAiStreamFramer;

impl StreamFramer for OpenAiStreamFramer {
    fn frames_for_chunk(
        &mut self,
        _internal_request: &Request,
        _raw_request: &[u8],
        chunk: &Chunk,
        first_chunk: bool,
        _final_chunk: bool,
        _accumulated: &Response,
    ) -> Vec<SseFrame> {
        let mut delta = serde_json::Map::new();
        if first_chunk {
            delta.insert("role".to_string(), json!("assistant"));
        }
        if let Some(text) = &chunk.delta_text {
            delta.insert("content".to_string(), json!(text));
        }
        if let Some(tcd) = &chunk.tool_call_delta {
            let entry = json!({
                "index": 0,
                "id": tcd.id,
                "function": {
                    "name": tcd.name,
                    "arguments": tcd.arguments_fragment,
                }
            });
            delta.insert("tool_calls".to_string(), json!([entry]));
        }

        let data = json!({
            "id": chunk.id,
            "object": "chat.completion.chunk",
            "model": chunk.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": chunk.finish_reason.map(finish_reason_to_wire),
            }],
        });
        vec![SseFrame { event: None, data }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_request() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
        let req = OpenAiAdapter.parse_request(body).unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].text(), "hi");
    }

    #[test]
    fn folds_tool_choice_into_extra() {
        let body = br#"{"model":"gpt-4o","messages":[],"tool_choice":"auto"}"#;
        let req = OpenAiAdapter.parse_request(body).unwrap();
        assert_eq!(req.extra.get("tool_choice").unwrap(), "auto");
    }

    #[test]
    fn rejects_malformed_body() {
        let err = OpenAiAdapter.parse_request(b"not json").unwrap_err();
        matches!(err, GatewayError::InputInvalid(_));
    }

    #[test]
    fn formats_response_with_usage() {
        let resp = Response {
            id: "resp-1".to_string(),
            model: "gpt-4o".to_string(),
            message: Message::assistant("hi there"),
            finish_reason: Some(FinishReason::Stop),
            usage: Some(crate::gateway::model::Usage { prompt_tokens: 5, completion_tokens: 2, total_tokens: 7 }),
        };
        let req = OpenAiAdapter.parse_request(br#"{"model":"gpt-4o","messages":[]}"#).unwrap();
        let wire = OpenAiAdapter.format_response(&req, b"", &resp);
        assert_eq!(wire["choices"][0]["message"]["content"], "hi there");
        assert_eq!(wire["choices"][0]["finish_reason"], "stop");
        assert_eq!(wire["usage"]["total_tokens"], 7);
    }

    #[test]
    fn first_streamed_chunk_carries_the_assistant_role() {
        let mut framer = OpenAiStreamFramer;
        let req = OpenAiAdapter.parse_request(br#"{"model":"gpt-4o","messages":[]}"#).unwrap();
        let accumulated = Response {
            id: String::new(),
            model: "gpt-4o".to_string(),
            message: Message::assistant(""),
            finish_reason: None,
            usage: None,
        };
        let first = framer.frames_for_chunk(
            &req,
            b"",
            &Chunk { delta_text: Some("hi".to_string()), ..Default::default() },
            true,
            false,
            &accumulated,
        );
        assert_eq!(first[0].data["choices"][0]["delta"]["role"], "assistant");

        let second = framer.frames_for_chunk(
            &req,
            b"",
            &Chunk { delta_text: Some(" there".to_string()), ..Default::default() },
            false,
            false,
            &accumulated,
        );
        assert!(second[0].data["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn replays_custom_metadata_only_when_vendor_matches() {
        let req = OpenAiAdapter.parse_request(br#"{"model":"gpt-4o","messages":[],"logprobs":true}"#).unwrap();
        let resp = Response {
            id: "resp-1".to_string(),
            model: "gpt-4o".to_string(),
            message: Message::assistant("hi"),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        };
        let wire = OpenAiAdapter.format_response(&req, b"", &resp);
        assert_eq!(wire["metadata"]["custom"]["logprobs"], true);
    }
}
