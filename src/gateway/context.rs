//! Per-request state threaded through the plugin pipeline.
//!
//! The dispatcher owns the single [`RequestContext`] for a request. Plugins never
//! get a mutable reference to it; instead each phase hands a plugin a read-only
//! view and the plugin returns a [`ContextPatch`] describing what it wants changed.
//! The dispatcher applies patches one at a time as plugins run, in priority order,
//! so a later plugin always observes the effect of an earlier one.

use crate::gateway::model::{Chunk, Request, Response};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock bookkeeping for one request: when it started, when it finished,
/// and the token counts once known. `end_ms`/token counts are filled in once
/// the full response (or the final streaming chunk) is available.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl RequestMetrics {
    fn start() -> Self {
        RequestMetrics { start_ms: now_ms(), end_ms: None, prompt_tokens: None, completion_tokens: None }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_ms.map(|end| end.saturating_sub(self.start_ms))
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// The mutable request state visible to the whole pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub path: String,
    pub method: String,
    pub model: String,
    pub user_id: Option<String>,
    /// Correlates this request with a client-chosen conversation, when the
    /// client sends one via `x-session-id`. Never generated by the gateway.
    pub session_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub request: Request,
    /// The raw, still-vendor-shaped request body, kept around so an output
    /// adapter can consult it (e.g. to replay a vendor-specific field back
    /// out when the output vendor matches the input vendor).
    pub raw_body: Vec<u8>,
    pub metadata: Map<String, Value>,
    pub plugin_data: Map<String, Value>,
    /// Incremented each time the provider client is retried for this request.
    pub retry_count: u32,
    pub metrics: RequestMetrics,
    /// The most recent chunk handed to `after_chunk`, so a plugin running
    /// later in the chain (or a future phase) can see what just arrived
    /// without it being threaded through every call site by hand.
    pub buffered_chunk: Option<Chunk>,
    /// The response merged from every chunk forwarded so far — the "whole
    /// response up to now" view `after_chunk` plugins need alongside the
    /// current delta.
    pub accumulated_response: Option<Response>,
    /// True once the chunk carrying a `finish_reason` has been seen.
    pub final_chunk: bool,
    /// Set when the pipeline or a provider call fails, for plugins/detached
    /// hooks that want to know the request ended in an error.
    pub error: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: String, path: String, method: String, request: Request, headers: HashMap<String, String>) -> Self {
        RequestContext {
            request_id,
            path,
            method,
            model: request.model.clone(),
            user_id: None,
            session_id: None,
            headers,
            request,
            raw_body: Vec::new(),
            metadata: Map::new(),
            plugin_data: Map::new(),
            retry_count: 0,
            metrics: RequestMetrics::start(),
            buffered_chunk: None,
            accumulated_response: None,
            final_chunk: false,
            error: None,
        }
    }

    /// Apply a patch produced by a plugin, using overlay semantics: scalar fields
    /// are replaced wholesale when present, `metadata`/`plugin_data` are deep
    /// merged key by key, and `headers` is replaced wholesale (a plugin that wants
    /// to add one header must echo the rest).
    pub fn apply_patch(&mut self, patch: ContextPatch) {
        if let Some(model) = patch.model {
            self.model = model.clone();
            self.request.model = model;
        }
        if let Some(user_id) = patch.user_id {
            self.user_id = Some(user_id);
        }
        if let Some(headers) = patch.headers {
            self.headers = headers;
        }
        if let Some(request) = patch.request {
            self.request = request;
        }
        if let Some(metadata) = patch.metadata {
            deep_merge(&mut self.metadata, metadata);
        }
        if let Some(plugin_data) = patch.plugin_data {
            deep_merge(&mut self.plugin_data, plugin_data);
        }
    }
}

/// What a plugin wants to change about the [`RequestContext`]. Every field is
/// optional; `None` means "leave as is."
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub request: Option<Request>,
    pub metadata: Option<Map<String, Value>>,
    pub plugin_data: Option<Map<String, Value>>,
}

impl ContextPatch {
    pub fn none() -> Self {
        ContextPatch::default()
    }
}

/// Recursively merges `incoming` into `base`: object values are merged key by key,
/// any other value (including arrays) simply overwrites what was there.
fn deep_merge(base: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, incoming_val) in incoming {
        match (base.get_mut(&key), incoming_val) {
            (Some(Value::Object(base_obj)), Value::Object(incoming_obj)) => {
                deep_merge(base_obj, incoming_obj);
            }
            (_, incoming_val) => {
                base.insert(key, incoming_val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::Request;
    use serde_json::json;

    fn base_request() -> Request {
        Request {
            model: "gpt-4o".to_string(),
            messages: vec![],
            tools: vec![],
            stream: false,
            temperature: None,
            max_tokens: None,
            system: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn metadata_deep_merges_nested_objects() {
        let mut ctx = RequestContext::new(
            "req-1".into(),
            "/v1/chat/completions".into(),
            "POST".into(),
            base_request(),
            HashMap::new(),
        );
        ctx.metadata.insert("auth".into(), json!({"user": "a", "scope": "read"}));

        let mut patch = ContextPatch::none();
        let mut incoming = Map::new();
        incoming.insert("auth".into(), json!({"scope": "write"}));
        patch.metadata = Some(incoming);
        ctx.apply_patch(patch);

        assert_eq!(ctx.metadata["auth"]["user"], json!("a"));
        assert_eq!(ctx.metadata["auth"]["scope"], json!("write"));
    }

    #[test]
    fn headers_patch_replaces_wholesale() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc".to_string());
        let mut ctx = RequestContext::new(
            "req-1".into(),
            "/v1/chat/completions".into(),
            "POST".into(),
            base_request(),
            headers,
        );

        let mut replacement = HashMap::new();
        replacement.insert("x-user-id".to_string(), "u1".to_string());
        let mut patch = ContextPatch::none();
        patch.headers = Some(replacement.clone());
        ctx.apply_patch(patch);

        assert_eq!(ctx.headers, replacement);
    }
}
