//! Builds the read-only tables the dispatcher consults on every request:
//! input/output adapters by name, a provider client per configured model, and
//! the plugin pipeline. Everything here is constructed once at startup from a
//! [`GatewayConfig`] and never mutated afterwards.

use crate::gateway::adapters::{anthropic::AnthropicAdapter, openai::OpenAiAdapter, InputAdapter, OutputAdapter};
use crate::gateway::config::{ConfigError, GatewayConfig, ModelEntry};
use crate::gateway::pipeline::{plugins::build_plugin, Conditions, PipelineEngine};
use crate::gateway::providers::{anthropic::AnthropicProvider, echo::EchoProvider, openai::OpenAiProvider, ProviderClient};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Registries {
    input_adapters: HashMap<String, Arc<dyn InputAdapter>>,
    output_adapters: HashMap<String, Arc<dyn OutputAdapter>>,
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    pub models: Vec<ModelEntry>,
    pub pipeline: PipelineEngine,
    default_model: Option<String>,
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("input_adapters", &self.input_adapters.keys().collect::<Vec<_>>())
            .field("output_adapters", &self.output_adapters.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("models", &self.models)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Registries {
    /// Build every table from a parsed configuration, failing fast if a model
    /// references an unknown provider type, a plugin references an unknown kind,
    /// or a required API key environment variable isn't set.
    pub fn build(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let mut input_adapters: HashMap<String, Arc<dyn InputAdapter>> = HashMap::new();
        input_adapters.insert("openai".to_string(), Arc::new(OpenAiAdapter));
        input_adapters.insert("anthropic".to_string(), Arc::new(AnthropicAdapter));

        let mut output_adapters: HashMap<String, Arc<dyn OutputAdapter>> = HashMap::new();
        output_adapters.insert("openai".to_string(), Arc::new(OpenAiAdapter));
        output_adapters.insert("anthropic".to_string(), Arc::new(AnthropicAdapter));

        let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        for model in &config.models {
            let client = build_provider(model)?;
            providers.insert(model.name.clone(), client);
        }

        let model_names: Vec<String> = config.models.iter().map(|m| m.name.clone()).collect();

        let mut pipeline = PipelineEngine::new();
        for entry in &config.plugins {
            let plugin = build_plugin(entry, &model_names)?;
            pipeline.register(plugin, Conditions::from(&entry.conditions), entry.priority);
        }

        for model in &config.models {
            for plugin_name in &model.plugins {
                if config.plugin_by_name(plugin_name).is_none() {
                    return Err(ConfigError(format!("model {}: references unknown plugin `{}`", model.name, plugin_name)));
                }
            }
        }

        // Last registration wins when more than one model sets `is_default`.
        let mut default_model: Option<String> = None;
        for model in &config.models {
            if model.is_default {
                if let Some(previous) = &default_model {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("model {}: `is_default` demotes earlier default `{}`", model.name, previous);
                    }
                }
                default_model = Some(model.name.clone());
            }
        }

        Ok(Registries { input_adapters, output_adapters, providers, models: config.models.clone(), pipeline, default_model })
    }

    pub fn input_adapter(&self, name: &str) -> Option<&Arc<dyn InputAdapter>> {
        self.input_adapters.get(name)
    }

    pub fn output_adapter(&self, name: &str) -> Option<&Arc<dyn OutputAdapter>> {
        self.output_adapters.get(name)
    }

    pub fn provider_for_model(&self, model_name: &str) -> Option<&Arc<dyn ProviderClient>> {
        self.providers.get(model_name)
    }

    /// Resolves a requested model name to a configured one, falling back to
    /// the registered default model (if any) when the name is unknown.
    /// Returns the model name actually resolved to alongside its provider, so
    /// the caller can update the context to reflect the model that will
    /// actually serve the request.
    pub fn resolve_model<'a>(&'a self, model_name: &'a str) -> Option<(&'a str, &'a Arc<dyn ProviderClient>)> {
        if let Some(provider) = self.providers.get(model_name) {
            return Some((model_name, provider));
        }
        let default_name = self.default_model.as_deref()?;
        self.providers.get(default_name).map(move |provider| (default_name, provider))
    }

    pub fn model_names_for_adapter(&self, adapter: &str) -> Vec<&str> {
        self.models.iter().filter(|m| m.provider == adapter || adapter_family(&m.provider) == adapter).map(|m| m.name.as_str()).collect()
    }
}

fn adapter_family(provider: &str) -> &str {
    match provider {
        "openai" | "echo" => "openai",
        "anthropic" => "anthropic",
        other => other,
    }
}

fn build_provider(model: &ModelEntry) -> Result<Arc<dyn ProviderClient>, ConfigError> {
    if model.provider == "echo" {
        return Ok(Arc::new(if model.fail_first > 0 {
            EchoProvider::failing_first(model.provider_model.clone(), model.fail_first)
        } else {
            EchoProvider::new(model.provider_model.clone())
        }));
    }

    let api_key = match &model.api_key_env {
        Some(env_name) => std::env::var(env_name)
            .map_err(|_| ConfigError(format!("model {}: environment variable `{}` is not set", model.name, env_name)))?,
        None => return Err(ConfigError(format!("model {}: `api_key_env` is required for provider `{}`", model.name, model.provider))),
    };

    match model.provider.as_str() {
        "openai" => {
            let base_url = model.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Ok(Arc::new(OpenAiProvider::new(base_url, api_key, model.provider_model.clone())))
        }
        "anthropic" => {
            let base_url = model.base_url.clone().unwrap_or_else(|| "https://api.anthropic.com/v1".to_string());
            Ok(Arc::new(AnthropicProvider::new(base_url, api_key, model.provider_model.clone())))
        }
        other => Err(ConfigError(format!("model {}: unknown provider `{}`", model.name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_a_model_plugin_reference_to_an_unknown_plugin() {
        let doc = r#"
models:
  - name: m1
    provider: echo
    provider_model: echo-1
    plugins: [does-not-exist]
"#;
        let config = GatewayConfig::from_str(doc).unwrap();
        let err = Registries::build(&config).unwrap_err();
        assert!(err.0.contains("does-not-exist"));
    }

    #[test]
    fn build_succeeds_for_an_echo_only_config() {
        let doc = r#"
models:
  - name: m1
    provider: echo
    provider_model: echo-1
"#;
        let config = GatewayConfig::from_str(doc).unwrap();
        let registries = Registries::build(&config).unwrap();
        assert!(registries.provider_for_model("m1").is_some());
    }

    #[test]
    fn resolve_model_falls_back_to_the_default_model_for_an_unknown_name() {
        let doc = r#"
models:
  - name: m1
    provider: echo
    provider_model: echo-1
  - name: m2
    provider: echo
    provider_model: echo-2
    is_default: true
"#;
        let config = GatewayConfig::from_str(doc).unwrap();
        let registries = Registries::build(&config).unwrap();
        let (resolved, _) = registries.resolve_model("does-not-exist").unwrap();
        assert_eq!(resolved, "m2");
    }

    #[test]
    fn resolve_model_returns_none_when_unknown_and_no_default_is_set() {
        let doc = r#"
models:
  - name: m1
    provider: echo
    provider_model: echo-1
"#;
        let config = GatewayConfig::from_str(doc).unwrap();
        let registries = Registries::build(&config).unwrap();
        assert!(registries.resolve_model("does-not-exist").is_none());
    }
}
