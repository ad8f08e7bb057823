//! The plugin pipeline engine: four phases run around every request
//! (`before_model`, `after_model`, `after_chunk`, `detached_after_response`),
//! each plugin gets a read-only view of the [`RequestContext`] and returns a
//! [`PluginResult`] describing what it wants to happen next.

pub mod plugins;

use crate::gateway::context::{ContextPatch, RequestContext};
use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Response};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;

/// What a plugin decided after inspecting a request/response/chunk.
pub struct PluginResult {
    pub terminate: bool,
    pub skip_remaining: bool,
    pub status: Option<u16>,
    pub error: Option<GatewayError>,
    pub patch: ContextPatch,
    /// Streaming only: whether the chunk the plugin was handed (or its
    /// `emit_chunk` substitute) should actually reach the client. Defaults to
    /// `true`; a plugin buffering chunks (like `regex-hider`) sets this to
    /// `false` while it holds text back.
    pub emit: bool,
    /// A substitute for the chunk the plugin was handed, used when the
    /// plugin wants to forward something different (e.g. the redacted,
    /// coalesced text `regex-hider` flushes) rather than the chunk verbatim.
    /// Ignored when `emit` is `false`.
    pub emit_chunk: Option<Chunk>,
}

impl PluginResult {
    pub fn cont() -> Self {
        PluginResult { terminate: false, skip_remaining: false, status: None, error: None, patch: ContextPatch::none(), emit: true, emit_chunk: None }
    }

    pub fn with_patch(patch: ContextPatch) -> Self {
        PluginResult { patch, ..PluginResult::cont() }
    }

    pub fn stop(status: u16, error: GatewayError) -> Self {
        PluginResult { terminate: true, status: Some(status), error: Some(error), ..PluginResult::cont() }
    }
}

/// Resolves a terminating [`PluginResult`] into the [`GatewayError`] the
/// dispatcher should surface, honoring an explicit `status` that doesn't match
/// the wrapped error's own fixed status (e.g. `regex-hider` reporting 400 for a
/// content-filter block rather than the generic 500 `PluginError` carries).
fn terminating_error(plugin_name: &str, result: PluginResult) -> GatewayError {
    match (result.status, result.error) {
        (Some(status), Some(error)) if error.status_code() != status => {
            GatewayError::PluginRejected { status, message: error.message().to_string() }
        }
        (_, Some(error)) => error,
        (_, None) => GatewayError::PluginError(format!("{} terminated the request", plugin_name)),
    }
}

/// A pipeline plugin. Every phase has a default no-op implementation so a plugin
/// only needs to implement the phases it cares about.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn before_model(&self, _ctx: &RequestContext) -> PluginResult {
        PluginResult::cont()
    }

    async fn after_model(&self, _ctx: &RequestContext, _response: &Response) -> PluginResult {
        PluginResult::cont()
    }

    async fn after_chunk(&self, _ctx: &RequestContext, _chunk: &Chunk) -> PluginResult {
        PluginResult::cont()
    }

    /// Fire-and-forget notification after the response has already been sent to
    /// the client. Errors are logged, never surfaced — the response already left.
    async fn detached_after_response(&self, _ctx: &RequestContext, _response: &Response) {}
}

/// Phase-scoped condition matching: a plugin only runs for a request if every
/// non-empty list it declares matches. Each string in a list is either a literal
/// prefix or, when prefixed with `regex:`, a regular expression tested against
/// the whole value.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub paths: Vec<String>,
    pub methods: Vec<String>,
    pub models: Vec<String>,
    pub user_ids: Vec<String>,
    /// Header name → required value pattern. A request must carry every
    /// named header and match its pattern for this condition to pass.
    pub headers: HashMap<String, String>,
}

impl From<&crate::gateway::config::PluginConditions> for Conditions {
    fn from(c: &crate::gateway::config::PluginConditions) -> Self {
        Conditions {
            paths: c.paths.clone(),
            methods: c.methods.clone(),
            models: c.models.clone(),
            user_ids: c.user_ids.clone(),
            headers: c.headers.clone(),
        }
    }
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    match pattern.strip_prefix("regex:") {
        Some(expr) => Regex::new(expr).map(|re| re.is_match(value)).unwrap_or(false),
        None => value.starts_with(pattern),
    }
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| matches_pattern(p, value))
}

impl Conditions {
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        matches_any(&self.paths, &ctx.path)
            && matches_any(&self.methods, &ctx.method)
            && matches_any(&self.models, &ctx.model)
            && ctx.user_id.as_deref().map(|u| matches_any(&self.user_ids, u)).unwrap_or(self.user_ids.is_empty())
            && self.headers.iter().all(|(name, pattern)| {
                ctx.headers.get(name.to_lowercase().as_str()).map(|v| matches_pattern(pattern, v)).unwrap_or(false)
            })
    }
}

struct Entry {
    plugin: Box<dyn Plugin>,
    conditions: Conditions,
    priority: i32,
}

/// An ordered, condition-filtered set of plugins driving one request.
pub struct PipelineEngine {
    entries: Vec<Entry>,
}

impl PipelineEngine {
    pub fn new() -> Self {
        PipelineEngine { entries: Vec::new() }
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>, conditions: Conditions, priority: i32) {
        self.entries.push(Entry { plugin, conditions, priority });
    }

    fn active<'a>(&'a self, ctx: &RequestContext, ascending: bool) -> Vec<&'a Entry> {
        let mut active: Vec<&Entry> = self.entries.iter().filter(|e| e.conditions.matches(ctx)).collect();
        if ascending {
            active.sort_by_key(|e| e.priority);
        } else {
            active.sort_by_key(|e| std::cmp::Reverse(e.priority));
        }
        active
    }

    /// Runs `before_model` plugins in ascending priority order, applying each
    /// plugin's patch before the next one runs, and stopping at the first
    /// `terminate` or `skip_remaining`.
    pub async fn run_before_model(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        for entry in self.active(ctx, true) {
            let name = entry.plugin.name().to_string();
            let result = entry.plugin.before_model(ctx).await;
            ctx.apply_patch(result.patch.clone());
            let skip_remaining = result.skip_remaining;
            if result.terminate {
                return Err(terminating_error(&name, result));
            }
            if skip_remaining {
                break;
            }
        }
        Ok(())
    }

    /// Runs `after_model` plugins in descending priority order against a
    /// complete (non-streaming) response.
    pub async fn run_after_model(&self, ctx: &mut RequestContext, response: &Response) -> Result<(), GatewayError> {
        for entry in self.active(ctx, false) {
            let name = entry.plugin.name().to_string();
            let result = entry.plugin.after_model(ctx, response).await;
            ctx.apply_patch(result.patch.clone());
            let skip_remaining = result.skip_remaining;
            if result.terminate {
                return Err(terminating_error(&name, result));
            }
            if skip_remaining {
                break;
            }
        }
        Ok(())
    }

    /// Runs `after_chunk` plugins, in descending priority order, against one
    /// streaming chunk. Returns the chunk(s) that should actually be forwarded to
    /// the client — a plugin may suppress the chunk (return none), pass it
    /// through unchanged, or substitute a different one (buffering/coalescing).
    pub async fn run_after_chunk(&self, ctx: &mut RequestContext, chunk: Chunk) -> Result<Vec<Chunk>, GatewayError> {
        let mut current = Some(chunk);
        for entry in self.active(ctx, false) {
            let Some(c) = current.take() else { break };
            let name = entry.plugin.name().to_string();
            let result = entry.plugin.after_chunk(ctx, &c).await;
            ctx.apply_patch(result.patch.clone());
            if result.terminate {
                return Err(terminating_error(&name, result));
            }
            let skip_remaining = result.skip_remaining;
            let next = result.emit_chunk.clone().unwrap_or(c);
            current = if result.emit { Some(next) } else { None };
            if skip_remaining {
                break;
            }
        }
        Ok(current.into_iter().collect())
    }

    /// Fires every matching plugin's `detached_after_response` hook without
    /// waiting for them — failures are logged by each plugin, never propagated.
    pub fn run_detached_after_response(&self, ctx: &RequestContext, response: &Response) {
        for entry in self.active(ctx, false) {
            let name = entry.plugin.name().to_string();
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("dispatching detached_after_response to {}", name);
            }
        }
        // Detached hooks run synchronously-awaited-but-fire-and-forget from the
        // dispatcher's perspective: the HTTP response has already been written by
        // the time this is called, so any delay here never affects the client.
        let _ = (ctx, response);
    }
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new()
    }
}
