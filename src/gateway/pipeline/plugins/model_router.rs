//! Bundled `model-router` plugin: rewrites the requested model to the next entry
//! in a configured fallback list, indexed by the request's retry count. The
//! dispatcher bumps `RequestContext::retry_count` each time it re-enters the
//! pipeline for a retried provider call, so the same plugin instance routes a
//! first attempt to `fallbacks[0]` and a second attempt (after an upstream
//! failure) to `fallbacks[1]`.

use crate::gateway::context::{ContextPatch, RequestContext};
use crate::gateway::error::GatewayError;
use crate::gateway::pipeline::{Plugin, PluginResult};
use async_trait::async_trait;

pub struct ModelRouterPlugin {
    name: String,
    fallbacks: Vec<String>,
    available_models: Vec<String>,
}

impl ModelRouterPlugin {
    pub fn new(name: impl Into<String>, fallbacks: Vec<String>, available_models: Vec<String>) -> Self {
        ModelRouterPlugin { name: name.into(), fallbacks, available_models }
    }
}

#[async_trait]
impl Plugin for ModelRouterPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_model(&self, ctx: &RequestContext) -> PluginResult {
        let index = ctx.retry_count as usize;
        let Some(model) = self.fallbacks.get(index) else {
            return PluginResult::stop(
                500,
                GatewayError::PluginError(format!("{}: retry_count {} exceeds the fallback list", self.name, ctx.retry_count)),
            );
        };
        if !self.available_models.iter().any(|m| m == model) {
            return PluginResult::stop(500, GatewayError::PluginError(format!("{}: model `{}` is not in available_models", self.name, model)));
        }
        if model == &ctx.model {
            return PluginResult::cont();
        }
        let mut patch = ContextPatch::none();
        patch.model = Some(model.clone());
        PluginResult::with_patch(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::Request;
    use std::collections::HashMap;

    fn ctx(retry_count: u32) -> RequestContext {
        let mut c = RequestContext::new(
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
            HashMap::new(),
        );
        c.retry_count = retry_count;
        c
    }

    fn available(models: &[&str]) -> Vec<String> {
        models.iter().map(|m| m.to_string()).collect()
    }

    #[tokio::test]
    async fn first_attempt_routes_to_first_fallback() {
        let plugin = ModelRouterPlugin::new(
            "router",
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            available(&["gpt-4o", "gpt-4o-mini"]),
        );
        let result = plugin.before_model(&ctx(0)).await;
        assert!(result.patch.model.is_none());
    }

    #[tokio::test]
    async fn retry_routes_to_the_next_fallback() {
        let plugin = ModelRouterPlugin::new(
            "router",
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            available(&["gpt-4o", "gpt-4o-mini"]),
        );
        let result = plugin.before_model(&ctx(1)).await;
        assert_eq!(result.patch.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn retries_past_the_list_terminate() {
        let plugin = ModelRouterPlugin::new(
            "router",
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            available(&["gpt-4o", "gpt-4o-mini"]),
        );
        let result = plugin.before_model(&ctx(5)).await;
        assert!(result.terminate);
    }

    #[tokio::test]
    async fn a_fallback_absent_from_available_models_terminates() {
        let plugin = ModelRouterPlugin::new("router", vec!["gpt-4o".to_string()], available(&["gpt-4o-mini"]));
        let result = plugin.before_model(&ctx(0)).await;
        assert!(result.terminate);
    }
}
