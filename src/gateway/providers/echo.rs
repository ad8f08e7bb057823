//! In-process provider that echoes the last user message back as the assistant
//! reply. Used by integration tests to exercise the full adapter/pipeline/
//! dispatcher path without a real upstream vendor or network access.

use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Content, FinishReason, Message, Request, Response, Role, Usage};
use crate::gateway::providers::{ChunkStream, ProviderClient};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct EchoProvider {
    model: String,
    fail_remaining: AtomicU32,
}

impl EchoProvider {
    pub fn new(model: impl Into<String>) -> Self {
        EchoProvider { model: model.into(), fail_remaining: AtomicU32::new(0) }
    }

    /// Test double helper: the first `n` calls return a retryable upstream
    /// error (502) before the provider starts echoing normally, so tests can
    /// exercise the dispatcher's retry loop and `model-router` without a real
    /// flaky upstream.
    pub fn failing_first(model: impl Into<String>, n: u32) -> Self {
        EchoProvider { model: model.into(), fail_remaining: AtomicU32::new(n) }
    }

    fn take_failure(&self) -> Option<GatewayError> {
        let mut current = self.fail_remaining.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return None;
            }
            match self.fail_remaining.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(GatewayError::UpstreamError { status: Some(502), message: format!("{}: simulated upstream failure", self.model) }),
                Err(observed) => current = observed,
            }
        }
    }
}

#[async_trait]
impl ProviderClient for EchoProvider {
    async fn execute(&self, request: &Request) -> Result<Response, GatewayError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let reply = reply_text(request);
        let prompt_tokens = request.messages.iter().map(|m| m.text().len() as u32).sum();
        let completion_tokens = reply.len() as u32;
        Ok(Response {
            id: "echo-response".to_string(),
            model: self.model.clone(),
            message: Message { role: Role::Assistant, content: vec![Content::text(reply)], tool_calls: vec![], tool_call_id: None },
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens }),
        })
    }

    async fn execute_streaming(&self, request: &Request) -> Result<ChunkStream, GatewayError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let reply = reply_text(request);
        let model = self.model.clone();
        let words: Vec<String> = reply.split_inclusive(' ').map(|w| w.to_string()).collect();

        let first = Chunk { id: Some("echo-response".to_string()), model: Some(model), ..Default::default() };
        let body = words.into_iter().map(|w| Chunk { delta_text: Some(w), ..Default::default() });
        let last = Chunk { finish_reason: Some(FinishReason::Stop), ..Default::default() };

        let stream = tokio_stream::iter(std::iter::once(first).chain(body).chain(std::iter::once(last)).map(Ok));
        Ok(Box::pin(stream))
    }

    fn upstream_model(&self) -> &str {
        &self.model
    }
}

fn reply_text(request: &Request) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text())
        .unwrap_or_default()
}
