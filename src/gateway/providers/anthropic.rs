//! Anthropic Messages API provider client. Unlike the teacher's Claude client,
//! which delegated to its OpenAI-compatible client against the Anthropic endpoint,
//! this talks the native Messages API directly — required to get real streaming
//! lifecycle events and `system`/content-block handling rather than an
//! OpenAI-shaped approximation.

use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Content, FinishReason, Message, Request, Response, Role, ToolCall, ToolCallDelta, Usage};
use crate::gateway::providers::{get_shared_http_client, ChunkStream, ProviderClient};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        AnthropicProvider { base_url: base_url.into(), api_key: api_key.into(), model: model.into() }
    }

    fn split_system(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = None;
        let mut wire = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => system = Some(msg.text()),
                Role::User => wire.push(json!({"role": "user", "content": msg.text()})),
                Role::Assistant => {
                    let mut blocks: Vec<serde_json::Value> = vec![json!({"type": "text", "text": msg.text()})];
                    for tc in &msg.tool_calls {
                        blocks.push(json!({"type": "tool_use", "id": tc.id, "name": tc.name, "input": tc.arguments}));
                    }
                    wire.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => wire.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.text(),
                    }],
                })),
            }
        }
        (system, wire)
    }

    fn wire_tools(tools: &[crate::gateway::model::Tool]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
            .collect()
    }

    fn build_body(&self, request: &Request, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::split_system(&request.messages);
        json!({
            "model": self.model,
            "system": system,
            "messages": messages,
            "tools": Self::wire_tools(&request.tools),
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        get_shared_http_client()
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::UpstreamTimeout(e.to_string())
                } else {
                    GatewayError::UpstreamError { status: None, message: e.to_string() }
                }
            })
    }
}

fn stop_reason_to_finish_reason(s: &str) -> FinishReason {
    match s {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "stop_sequence" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_usage(value: &serde_json::Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    let prompt_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Some(Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens })
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    async fn execute(&self, request: &Request) -> Result<Response, GatewayError> {
        let body = self.build_body(request, false);
        let resp = self.post(body).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GatewayError::UpstreamError { status: None, message: e.to_string() })?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("anthropic provider: HTTP {} — {}", status, text);
            }
            return Err(GatewayError::UpstreamError { status: Some(status.as_u16()), message: text });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Internal(format!("malformed upstream response: {}", e)))?;

        let content_blocks = parsed.get("content").and_then(|c| c.as_array()).cloned().unwrap_or_default();
        let text_content: String = content_blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();
        let tool_calls: Vec<ToolCall> = content_blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
            .filter_map(|b| {
                Some(ToolCall {
                    id: b.get("id")?.as_str()?.to_string(),
                    name: b.get("name")?.as_str()?.to_string(),
                    arguments: b.get("input").cloned().unwrap_or(json!({})),
                })
            })
            .collect();

        let finish_reason = parsed.get("stop_reason").and_then(|s| s.as_str()).map(stop_reason_to_finish_reason);

        Ok(Response {
            id: parsed.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            model: parsed.get("model").and_then(|v| v.as_str()).unwrap_or(&self.model).to_string(),
            message: Message { role: Role::Assistant, content: vec![Content::text(text_content)], tool_calls, tool_call_id: None },
            finish_reason,
            usage: parse_usage(&parsed),
        })
    }

    async fn execute_streaming(&self, request: &Request) -> Result<ChunkStream, GatewayError> {
        let body = self.build_body(request, true);
        let resp = self.post(body).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamError { status: Some(status.as_u16()), message: text });
        }

        let byte_stream = resp.bytes_stream();
        let chunk_stream = crate::gateway::providers::sse::sse_event_frames(byte_stream).filter_map(|(event, data)| async move {
            chunk_from_event(&event, &data).map(Ok)
        });

        Ok(Box::pin(chunk_stream))
    }

    fn upstream_model(&self) -> &str {
        &self.model
    }
}

/// Translate one Anthropic SSE event into an internal [`Chunk`], folding the
/// lifecycle events that carry content deltas and dropping the ones (like
/// `content_block_stop`) that are purely structural.
fn chunk_from_event(event: &str, data: &serde_json::Value) -> Option<Chunk> {
    match event {
        "message_start" => {
            let message = data.get("message")?;
            Some(Chunk {
                id: message.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
                model: message.get("model").and_then(|v| v.as_str()).map(|s| s.to_string()),
                usage: parse_usage(message),
                ..Default::default()
            })
        }
        "content_block_delta" => {
            let delta = data.get("delta")?;
            match delta.get("type").and_then(|t| t.as_str()) {
                Some("text_delta") => Some(Chunk {
                    delta_text: delta.get("text").and_then(|t| t.as_str()).map(|s| s.to_string()),
                    ..Default::default()
                }),
                Some("input_json_delta") => Some(Chunk {
                    tool_call_delta: Some(ToolCallDelta {
                        id: None,
                        name: None,
                        arguments_fragment: delta.get("partial_json").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    }),
                    ..Default::default()
                }),
                _ => None,
            }
        }
        "content_block_start" => {
            let block = data.get("content_block")?;
            if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                Some(Chunk {
                    tool_call_delta: Some(ToolCallDelta {
                        id: block.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
                        name: block.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()),
                        arguments_fragment: String::new(),
                    }),
                    ..Default::default()
                })
            } else {
                None
            }
        }
        "message_delta" => {
            let stop_reason = data.get("delta").and_then(|d| d.get("stop_reason")).and_then(|s| s.as_str());
            Some(Chunk {
                finish_reason: stop_reason.map(stop_reason_to_finish_reason),
                usage: parse_usage(data),
                ..Default::default()
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_start_extracts_id_and_model() {
        let data = json!({"message": {"id": "msg_1", "model": "claude-3-5-sonnet", "usage": {"input_tokens": 3, "output_tokens": 0}}});
        let chunk = chunk_from_event("message_start", &data).unwrap();
        assert_eq!(chunk.id.as_deref(), Some("msg_1"));
        assert_eq!(chunk.model.as_deref(), Some("claude-3-5-sonnet"));
    }

    #[test]
    fn text_delta_extracts_text() {
        let data = json!({"delta": {"type": "text_delta", "text": "hi"}});
        let chunk = chunk_from_event("content_block_delta", &data).unwrap();
        assert_eq!(chunk.delta_text.as_deref(), Some("hi"));
    }

    #[test]
    fn content_block_stop_is_ignored() {
        assert!(chunk_from_event("content_block_stop", &json!({})).is_none());
    }

    #[test]
    fn message_delta_maps_stop_reason() {
        let data = json!({"delta": {"stop_reason": "max_tokens"}});
        let chunk = chunk_from_event("message_delta", &data).unwrap();
        assert_eq!(chunk.finish_reason, Some(FinishReason::Length));
    }
}
