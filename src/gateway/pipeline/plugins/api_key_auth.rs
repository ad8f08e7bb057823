//! Bundled `basic-api-key-auth` plugin: validates a bearer token against a fixed
//! list of configured keys using a constant-time comparison, the same
//! SHA-256 + [`subtle::ConstantTimeEq`] pattern the teacher uses for its own
//! MCP server's bearer/basic auth validation.

use crate::gateway::context::RequestContext;
use crate::gateway::error::GatewayError;
use crate::gateway::pipeline::{Plugin, PluginResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub struct ApiKeyAuthPlugin {
    name: String,
    /// SHA-256 digests of the accepted keys, so the comparison never holds a raw
    /// secret alongside the candidate any longer than needed to hash it.
    key_digests: Vec<[u8; 32]>,
}

impl ApiKeyAuthPlugin {
    pub fn new(name: impl Into<String>, keys: &[String]) -> Self {
        ApiKeyAuthPlugin { name: name.into(), key_digests: keys.iter().map(|k| digest(k)).collect() }
    }

    fn accepts(&self, candidate: &str) -> bool {
        let candidate_digest = digest(candidate);
        self.key_digests.iter().any(|d| d.ct_eq(&candidate_digest).into())
    }
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

fn bearer_token(ctx: &RequestContext) -> Option<&str> {
    ctx.headers.get("authorization").and_then(|v| v.strip_prefix("Bearer "))
}

#[async_trait]
impl Plugin for ApiKeyAuthPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_model(&self, ctx: &RequestContext) -> PluginResult {
        match bearer_token(ctx) {
            Some(token) if self.accepts(token) => PluginResult::cont(),
            Some(_) => PluginResult::stop(401, GatewayError::Unauthorized("invalid API key".to_string())),
            None => PluginResult::stop(401, GatewayError::Unauthorized("missing Authorization header".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::Request;
    use std::collections::HashMap;

    fn ctx_with_auth(header: Option<&str>) -> RequestContext {
        let mut headers = HashMap::new();
        if let Some(h) = header {
            headers.insert("authorization".to_string(), h.to_string());
        }
        RequestContext::new(
            "req-1".into(),
            "/v1/chat/completions".into(),
            "POST".into(),
            Request {
                model: "gpt-4o".to_string(),
                messages: vec![],
                tools: vec![],
                stream: false,
                temperature: None,
                max_tokens: None,
                system: None,
                extra: HashMap::new(),
            },
            headers,
        )
    }

    #[tokio::test]
    async fn accepts_a_configured_key() {
        let plugin = ApiKeyAuthPlugin::new("auth", &["client-key-1".to_string()]);
        let ctx = ctx_with_auth(Some("Bearer client-key-1"));
        assert!(!plugin.before_model(&ctx).await.terminate);
    }

    #[tokio::test]
    async fn rejects_an_unknown_key() {
        let plugin = ApiKeyAuthPlugin::new("auth", &["client-key-1".to_string()]);
        let ctx = ctx_with_auth(Some("Bearer wrong-key"));
        let result = plugin.before_model(&ctx).await;
        assert!(result.terminate);
        assert_eq!(result.status, Some(401));
    }

    #[tokio::test]
    async fn rejects_a_missing_header() {
        let plugin = ApiKeyAuthPlugin::new("auth", &["client-key-1".to_string()]);
        let ctx = ctx_with_auth(None);
        assert!(plugin.before_model(&ctx).await.terminate);
    }
}
