//! Bundled `auth-gateway` plugin: validates the inbound bearer token against an
//! external HTTP auth service, caches successful validations for a configurable
//! TTL (a plain map guarded by a lock — no external cache dependency needed at
//! this scale), strips any `x-auth-*`/`x-user-*` headers the client tried to set
//! directly, and fails closed when the auth service itself is unreachable.

use crate::gateway::context::RequestContext;
use crate::gateway::error::GatewayError;
use crate::gateway::pipeline::{Plugin, PluginResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    user_id: String,
    expires_at: Instant,
}

pub struct AuthGatewayPlugin {
    name: String,
    validate_url: String,
    http_client: reqwest::Client,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl AuthGatewayPlugin {
    pub fn new(name: impl Into<String>, validate_url: impl Into<String>, ttl: Duration) -> Self {
        AuthGatewayPlugin {
            name: name.into(),
            validate_url: validate_url.into(),
            http_client: crate::gateway::providers::get_shared_http_client().clone(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached_user(&self, token: &str) -> Option<String> {
        let mut cache = self.cache.lock().expect("auth-gateway cache lock poisoned");
        match cache.get(token) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.user_id.clone()),
            Some(_) => {
                cache.remove(token);
                None
            }
            None => None,
        }
    }

    fn cache_user(&self, token: &str, user_id: &str) {
        let mut cache = self.cache.lock().expect("auth-gateway cache lock poisoned");
        cache.insert(token.to_string(), CacheEntry { user_id: user_id.to_string(), expires_at: Instant::now() + self.ttl });
    }

    async fn validate_upstream(&self, token: &str) -> Result<String, GatewayError> {
        let resp = self
            .http_client
            .post(&self.validate_url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| GatewayError::AuthServiceUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Forbidden("auth service rejected the token".to_string()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::AuthServiceUnavailable(format!("malformed auth service response: {}", e)))?;

        body.get("user_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| GatewayError::AuthServiceUnavailable("auth service response missing user_id".to_string()))
    }
}

fn strip_auth_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| {
            let lower = k.to_lowercase();
            !lower.starts_with("x-auth-") && !lower.starts_with("x-user-")
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl Plugin for AuthGatewayPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_model(&self, ctx: &RequestContext) -> PluginResult {
        let token = match ctx.headers.get("authorization").and_then(|v| v.strip_prefix("Bearer ")) {
            Some(t) => t,
            None => return PluginResult::stop(401, GatewayError::Unauthorized("missing Authorization header".to_string())),
        };

        let user_id = match self.cached_user(token) {
            Some(user_id) => user_id,
            None => match self.validate_upstream(token).await {
                Ok(user_id) => {
                    self.cache_user(token, &user_id);
                    user_id
                }
                Err(err) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("auth-gateway: failing closed for token validation error: {}", err);
                    }
                    let status = err.status_code();
                    return PluginResult::stop(status, err);
                }
            },
        };

        let mut patch = crate::gateway::context::ContextPatch::none();
        patch.user_id = Some(user_id.clone());
        patch.headers = Some(strip_auth_headers(&ctx.headers));
        let mut meta = serde_json::Map::new();
        meta.insert("authenticated_user".to_string(), serde_json::json!(user_id));
        patch.metadata = Some(meta);
        PluginResult::with_patch(patch)
    }
}
