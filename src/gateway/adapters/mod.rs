//! Input adapters translate a vendor's wire request into the internal [`Request`];
//! output adapters translate an internal [`Response`]/[`Chunk`] back into that same
//! vendor's wire shape. A gateway route pairs one input adapter with a provider
//! client and (usually, but not necessarily) the same vendor's output adapter, so a
//! client speaking Anthropic's API can be served by an OpenAI-hosted model
//! transparently.

pub mod anthropic;
pub mod openai;

use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Request, Response};

/// Parses a vendor-shaped request body into the internal model.
pub trait InputAdapter: Send + Sync {
    fn parse_request(&self, body: &[u8]) -> Result<Request, GatewayError>;
}

/// One SSE frame ready to write to the response body: the optional `event:` line
/// (Anthropic uses several named events; OpenAI uses none) followed by the
/// `data:` line's JSON payload.
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: serde_json::Value,
}

/// Per-stream state for formatting a sequence of internal [`Chunk`]s into a
/// vendor's SSE framing. A fresh framer is created for each streaming request
/// because some vendors (Anthropic) need to track content-block indices and emit
/// lifecycle events around the raw deltas.
pub trait StreamFramer: Send {
    /// `internal_request`/`raw_request` give a framer access to fields the
    /// internal [`Chunk`] doesn't carry (e.g. replaying vendor-specific fields
    /// preserved in `request.extra`); `first_chunk`/`final_chunk` mark the edges
    /// of the stream; `accumulated` is the whole response merged so far,
    /// including this chunk.
    fn frames_for_chunk(
        &mut self,
        internal_request: &Request,
        raw_request: &[u8],
        chunk: &Chunk,
        first_chunk: bool,
        final_chunk: bool,
        accumulated: &Response,
    ) -> Vec<SseFrame>;

    /// Frames emitted once, after the last chunk, to close out the stream (e.g.
    /// Anthropic's `message_stop`). Returns an empty vec for vendors whose streams
    /// end with a sentinel line instead (see [`OutputAdapter::done_sentinel`]).
    fn closing_frames(&mut self, _internal_request: &Request, _raw_request: &[u8], _accumulated: &Response) -> Vec<SseFrame> {
        Vec::new()
    }
}

/// Formats internal responses/chunks into a vendor's wire shape.
pub trait OutputAdapter: Send + Sync {
    fn format_response(&self, internal_request: &Request, raw_request: &[u8], response: &Response) -> serde_json::Value;

    fn new_stream_framer(&self) -> Box<dyn StreamFramer>;

    /// A raw, non-JSON sentinel line terminating the stream (OpenAI's literal
    /// `data: [DONE]`). `None` for vendors that signal completion with a named
    /// event instead.
    fn done_sentinel(&self) -> Option<&'static str> {
        None
    }
}

/// Vendor-specific request fields with no internal-model counterpart are kept in
/// `request.extra` (via each input adapter's `#[serde(flatten)]` capture) rather
/// than dropped. `original_provider` names the vendor that produced the request;
/// an output adapter replays the remaining entries back into the wire response,
/// but only when it matches the vendor that parsed the request — relaying them
/// through a cross-vendor-routed response would forward fields the other wire
/// format doesn't define.
pub fn custom_metadata(request: &Request, own_vendor: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    if request.extra.get("original_provider").and_then(|v| v.as_str()) != Some(own_vendor) {
        return None;
    }
    let custom: serde_json::Map<String, serde_json::Value> =
        request.extra.iter().filter(|(k, _)| k.as_str() != "original_provider").map(|(k, v)| (k.clone(), v.clone())).collect();
    if custom.is_empty() {
        None
    } else {
        Some(custom)
    }
}

/// Render a [`SseFrame`] as the literal bytes written to the HTTP response body.
pub fn render_frame(frame: &SseFrame) -> String {
    let mut out = String::new();
    if let Some(event) = frame.event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    out.push_str("data: ");
    out.push_str(&serde_json::to_string(&frame.data).unwrap_or_else(|_| "{}".to_string()));
    out.push_str("\n\n");
    out
}
