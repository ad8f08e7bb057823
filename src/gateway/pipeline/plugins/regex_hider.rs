//! Bundled `regex-hider` plugin: redacts (or blocks) text matching configured
//! patterns in the request, the response, or both.
//!
//! Streaming responses are buffered per request rather than matched chunk by
//! chunk, since a pattern can straddle a chunk boundary. The buffer flushes
//! (runs the redaction pass and emits the result) on whichever trigger fires
//! first: a newline in the buffered text, the buffer reaching `max_buffer_size`,
//! or `flush_timeout_ms` elapsing since the buffer was last flushed. Buffer state
//! lives in [`RequestContext::plugin_data`] under this plugin's name so it
//! survives between `after_chunk` calls without any mutable state on the plugin
//! instance itself, which is shared across concurrent requests.

use crate::gateway::context::{ContextPatch, RequestContext};
use crate::gateway::error::GatewayError;
use crate::gateway::model::Chunk;
use crate::gateway::pipeline::{Plugin, PluginResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Request,
    Response,
    Both,
}

pub struct RegexHiderPlugin {
    name: String,
    scope: Scope,
    patterns: Vec<Regex>,
    replacement: String,
    block_on_match: bool,
    max_buffer_size: usize,
    flush_timeout_ms: u64,
}

impl RegexHiderPlugin {
    pub fn new(
        name: impl Into<String>,
        scope: Scope,
        patterns: Vec<Regex>,
        replacement: impl Into<String>,
        block_on_match: bool,
        max_buffer_size: usize,
        flush_timeout_ms: u64,
    ) -> Self {
        RegexHiderPlugin { name: name.into(), scope, patterns, replacement: replacement.into(), block_on_match, max_buffer_size, flush_timeout_ms }
    }

    fn redact(&self, text: &str) -> (String, bool) {
        let mut matched = false;
        let mut out = text.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&out) {
                matched = true;
                out = pattern.replace_all(&out, self.replacement.as_str()).into_owned();
            }
        }
        (out, matched)
    }

    fn buffer_key(&self) -> String {
        format!("regex_hider:{}", self.name)
    }

    fn load_buffer(&self, ctx: &RequestContext) -> (String, u64) {
        match ctx.plugin_data.get(&self.buffer_key()) {
            Some(v) => (
                v.get("buffer").and_then(|b| b.as_str()).unwrap_or("").to_string(),
                v.get("last_flush_ms").and_then(|t| t.as_u64()).unwrap_or(0),
            ),
            None => (String::new(), now_ms()),
        }
    }

    fn save_buffer_patch(&self, buffer: &str, last_flush_ms: u64) -> ContextPatch {
        let mut patch = ContextPatch::none();
        let mut meta = serde_json::Map::new();
        meta.insert(self.buffer_key(), json!({"buffer": buffer, "last_flush_ms": last_flush_ms}));
        patch.plugin_data = Some(meta);
        patch
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[async_trait]
impl Plugin for RegexHiderPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_model(&self, ctx: &RequestContext) -> PluginResult {
        if !matches!(self.scope, Scope::Request | Scope::Both) {
            return PluginResult::cont();
        }

        let mut request = ctx.request.clone();
        let mut any_matched = false;
        for message in request.messages.iter_mut() {
            let text = message.text();
            if text.is_empty() {
                continue;
            }
            let (redacted, matched) = self.redact(&text);
            if matched {
                any_matched = true;
                message.content = vec![crate::gateway::model::Content::text(redacted)];
            }
        }

        if any_matched && self.block_on_match {
            return PluginResult::stop(400, GatewayError::PluginError(format!("{}: request blocked by content filter", self.name)));
        }

        let mut patch = ContextPatch::none();
        patch.request = Some(request);
        PluginResult::with_patch(patch)
    }

    async fn after_chunk(&self, ctx: &RequestContext, chunk: &Chunk) -> PluginResult {
        if !matches!(self.scope, Scope::Response | Scope::Both) {
            return PluginResult::cont();
        }

        let Some(delta) = &chunk.delta_text else {
            return PluginResult::cont();
        };

        let (mut buffer, last_flush_ms) = self.load_buffer(ctx);
        buffer.push_str(delta);

        let should_flush = buffer.contains('\n') || buffer.len() >= self.max_buffer_size || now_ms().saturating_sub(last_flush_ms) >= self.flush_timeout_ms;

        if !should_flush {
            let mut result = PluginResult::with_patch(self.save_buffer_patch(&buffer, last_flush_ms));
            result.emit = false;
            return result;
        }

        let (redacted, matched) = self.redact(&buffer);
        if matched && self.block_on_match {
            return PluginResult::stop(400, GatewayError::PluginError(format!("{}: response blocked by content filter", self.name)));
        }

        let mut result = PluginResult::with_patch(self.save_buffer_patch("", now_ms()));
        result.emit_chunk = Some(Chunk { delta_text: Some(redacted), ..chunk.clone() });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::Request;
    use std::collections::HashMap;

    fn ctx() -> RequestContext {
        RequestContext::new(
            "req-1".into(),
            "/v1/chat/completions".into(),
            "POST".into(),
            Request {
                model: "gpt-4o".to_string(),
                messages: vec![crate::gateway::model::Message::user("my ssn is 123-45-6789")],
                tools: vec![],
                stream: false,
                temperature: None,
                max_tokens: None,
                system: None,
                extra: HashMap::new(),
            },
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn redacts_matching_request_text() {
        let plugin = RegexHiderPlugin::new("hider", Scope::Request, vec![Regex::new(r"\d{3}-\d{2}-\d{4}").unwrap()], "[SSN]", false, 1024, 1000);
        let result = plugin.before_model(&ctx()).await;
        let req = result.patch.request.unwrap();
        assert_eq!(req.messages[0].text(), "my ssn is [SSN]");
    }

    #[tokio::test]
    async fn blocks_when_configured_to() {
        let plugin = RegexHiderPlugin::new("hider", Scope::Request, vec![Regex::new(r"\d{3}-\d{2}-\d{4}").unwrap()], "[SSN]", true, 1024, 1000);
        let result = plugin.before_model(&ctx()).await;
        assert!(result.terminate);
    }

    #[tokio::test]
    async fn streaming_buffer_flushes_on_newline() {
        let plugin = RegexHiderPlugin::new("hider", Scope::Response, vec![Regex::new("secret").unwrap()], "***", false, 1024, 60_000);
        let mut c = ctx();

        let first = plugin.after_chunk(&c, &Chunk { delta_text: Some("no newline here".to_string()), ..Default::default() }).await;
        assert!(!first.emit);
        assert!(first.emit_chunk.is_none());
        c.apply_patch(first.patch);

        let second = plugin.after_chunk(&c, &Chunk { delta_text: Some(" and a secret\n".to_string()), ..Default::default() }).await;
        let emitted = second.emit_chunk.unwrap();
        assert_eq!(emitted.delta_text.as_deref(), Some("no newline here and a ***\n"));
    }

    #[tokio::test]
    async fn streaming_buffer_flushes_immediately_past_max_size() {
        let plugin = RegexHiderPlugin::new("hider", Scope::Response, vec![], "***", false, 4, 60_000);
        let result = plugin.after_chunk(&ctx(), &Chunk { delta_text: Some("longer than four".to_string()), ..Default::default() }).await;
        assert!(result.emit_chunk.unwrap().delta_text.is_some());
    }
}
