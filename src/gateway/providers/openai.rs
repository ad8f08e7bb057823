//! OpenAI-compatible provider client. Speaks the Chat Completions wire format
//! directly over `reqwest` rather than through a vendor SDK — the same approach
//! the teacher's own image-generation code path takes whenever the wire format
//! needs exact control (here: precise control over the native tool-calling and
//! SSE chunk shapes crossing the gateway).

use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Content, FinishReason, Message, Response, Role, ToolCall, ToolCallDelta, Usage};
use crate::gateway::providers::{get_shared_http_client, ChunkStream, ProviderClient};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiProvider { base_url: base_url.into(), api_key: api_key.into(), model: model.into() }
    }

    fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| match msg.role {
                Role::System => json!({"role": "system", "content": msg.text()}),
                Role::User => json!({"role": "user", "content": msg.text()}),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        json!({"role": "assistant", "content": msg.text()})
                    } else {
                        let tool_calls: Vec<serde_json::Value> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": serde_json::to_string(&tc.arguments).unwrap_or_else(|_| "{}".into()),
                                    }
                                })
                            })
                            .collect();
                        json!({"role": "assistant", "content": serde_json::Value::Null, "tool_calls": tool_calls})
                    }
                }
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.text(),
                }),
            })
            .collect()
    }

    fn wire_tools(tools: &[crate::gateway::model::Tool]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| json!({"type": "function", "function": {"name": t.name, "description": t.description, "parameters": t.parameters}}))
            .collect()
    }

    async fn post(&self, body: serde_json::Value) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        get_shared_http_client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

fn parse_usage(value: &serde_json::Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    let prompt_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Some(Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens })
}

fn finish_reason_from_wire(s: &str) -> FinishReason {
    match s {
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    async fn execute(&self, request: &crate::gateway::model::Request) -> Result<Response, GatewayError> {
        let body = json!({
            "model": self.model,
            "messages": Self::wire_messages(&request.messages),
            "tools": Self::wire_tools(&request.tools),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let resp = self.post(body).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GatewayError::UpstreamError { status: None, message: e.to_string() })?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("openai provider: HTTP {} — {}", status, text);
            }
            return Err(GatewayError::UpstreamError { status: Some(status.as_u16()), message: text });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Internal(format!("malformed upstream response: {}", e)))?;

        let choice = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| GatewayError::Internal("upstream response had no choices".to_string()))?;
        let message_obj = choice.get("message").ok_or_else(|| GatewayError::Internal("choice had no message".to_string()))?;

        let content = message_obj.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();
        let tool_calls: Vec<ToolCall> = message_obj
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                        let arguments = serde_json::from_str(args_str).unwrap_or(json!({}));
                        Some(ToolCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = choice.get("finish_reason").and_then(|f| f.as_str()).map(finish_reason_from_wire);

        Ok(Response {
            id: parsed.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            model: parsed.get("model").and_then(|v| v.as_str()).unwrap_or(&self.model).to_string(),
            message: Message {
                role: Role::Assistant,
                content: vec![Content::text(content)],
                tool_calls,
                tool_call_id: None,
            },
            finish_reason,
            usage: parse_usage(&parsed),
        })
    }

    async fn execute_streaming(&self, request: &crate::gateway::model::Request) -> Result<ChunkStream, GatewayError> {
        let body = json!({
            "model": self.model,
            "messages": Self::wire_messages(&request.messages),
            "tools": Self::wire_tools(&request.tools),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let resp = self.post(body).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamError { status: Some(status.as_u16()), message: text });
        }

        let byte_stream = resp.bytes_stream();
        let chunk_stream = crate::gateway::providers::sse::sse_lines(byte_stream).filter_map(|line| async move {
            if line == "[DONE]" {
                return None;
            }
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(v) => Some(Ok(chunk_from_wire(&v))),
                Err(e) => Some(Err(GatewayError::Internal(format!("malformed stream chunk: {}", e)))),
            }
        });

        Ok(Box::pin(chunk_stream))
    }

    fn upstream_model(&self) -> &str {
        &self.model
    }
}

fn chunk_from_wire(v: &serde_json::Value) -> Chunk {
    let choice = v.get("choices").and_then(|c| c.get(0));
    let delta = choice.and_then(|c| c.get("delta"));

    let delta_text = delta.and_then(|d| d.get("content")).and_then(|c| c.as_str()).map(|s| s.to_string());

    let tool_call_delta = delta
        .and_then(|d| d.get("tool_calls"))
        .and_then(|tc| tc.get(0))
        .map(|tc| ToolCallDelta {
            id: tc.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            name: tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()).map(|s| s.to_string()),
            arguments_fragment: tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        });

    Chunk {
        id: v.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
        model: v.get("model").and_then(|v| v.as_str()).map(|s| s.to_string()),
        delta_text,
        tool_call_delta,
        finish_reason: choice.and_then(|c| c.get("finish_reason")).and_then(|f| f.as_str()).map(finish_reason_from_wire),
        usage: parse_usage(v),
    }
}
