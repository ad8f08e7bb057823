//! The five bundled plugin implementations and the `kind` string → constructor
//! mapping used by [`crate::gateway::registry`] to build a [`Plugin`] from a
//! configuration entry's free-form `settings` blob.

pub mod api_key_auth;
pub mod auth_gateway;
pub mod model_router;
pub mod prompt_manager;
pub mod regex_hider;

use crate::gateway::config::{setting_str, ConfigError, PluginEntry};
use crate::gateway::pipeline::Plugin;
use regex::Regex;
use std::time::Duration;

/// Construct a bundled plugin instance from its configuration entry. Returns an
/// error naming the offending field rather than panicking — a malformed plugin
/// entry is caller error, not a bug in the gateway. `available_models` is the
/// full list of configured model names, needed by `model-router` to validate
/// its fallback list against.
pub fn build_plugin(entry: &PluginEntry, available_models: &[String]) -> Result<Box<dyn Plugin>, ConfigError> {
    match entry.kind.as_str() {
        "basic-api-key-auth" => {
            let keys: Vec<String> = entry
                .settings
                .get("keys")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .ok_or_else(|| ConfigError(format!("plugin {}: basic-api-key-auth requires a `keys` array", entry.name)))?;
            Ok(Box::new(api_key_auth::ApiKeyAuthPlugin::new(entry.name.clone(), &keys)))
        }
        "auth-gateway" => {
            let validate_url = setting_str(&entry.settings, "validate_url")
                .ok_or_else(|| ConfigError(format!("plugin {}: auth-gateway requires `validate_url`", entry.name)))?;
            let ttl_seconds = entry.settings.get("cache_ttl_seconds").and_then(|v| v.as_u64()).unwrap_or(300);
            Ok(Box::new(auth_gateway::AuthGatewayPlugin::new(entry.name.clone(), validate_url, Duration::from_secs(ttl_seconds))))
        }
        "model-router" => {
            let fallbacks: Vec<String> = entry
                .settings
                .get("fallbacks")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .ok_or_else(|| ConfigError(format!("plugin {}: model-router requires a `fallbacks` array", entry.name)))?;
            Ok(Box::new(model_router::ModelRouterPlugin::new(entry.name.clone(), fallbacks, available_models.to_vec())))
        }
        "prompt-manager" => {
            let mode = match setting_str(&entry.settings, "mode") {
                Some("override") | None => prompt_manager::Mode::Override,
                Some("before") => prompt_manager::Mode::Before,
                Some("after") => prompt_manager::Mode::After,
                Some("wrapper") => prompt_manager::Mode::Wrapper,
                Some(other) => return Err(ConfigError(format!("plugin {}: unknown prompt-manager mode `{}`", entry.name, other))),
            };
            let text = setting_str(&entry.settings, "text")
                .ok_or_else(|| ConfigError(format!("plugin {}: prompt-manager requires `text`", entry.name)))?
                .to_string();
            let experiment = entry.settings.get("experiment").map(|exp| {
                let variant_text = setting_str(exp, "variant_text").unwrap_or_default().to_string();
                let variant_weight = exp.get("variant_weight").and_then(|v| v.as_u64()).unwrap_or(0) as u8;
                prompt_manager::Experiment { variant_text, variant_weight }
            });
            Ok(Box::new(prompt_manager::PromptManagerPlugin::new(entry.name.clone(), mode, text, experiment)))
        }
        "regex-hider" => {
            let scope = match setting_str(&entry.settings, "scope") {
                Some("request") => regex_hider::Scope::Request,
                Some("response") | None => regex_hider::Scope::Response,
                Some("both") => regex_hider::Scope::Both,
                Some(other) => return Err(ConfigError(format!("plugin {}: unknown regex-hider scope `{}`", entry.name, other))),
            };
            let patterns: Vec<Regex> = entry
                .settings
                .get("patterns")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(Regex::new).collect::<Result<Vec<_>, _>>())
                .transpose()
                .map_err(|e| ConfigError(format!("plugin {}: invalid regex pattern: {}", entry.name, e)))?
                .ok_or_else(|| ConfigError(format!("plugin {}: regex-hider requires a `patterns` array", entry.name)))?;
            let replacement = setting_str(&entry.settings, "replacement").unwrap_or("[REDACTED]").to_string();
            let block_on_match = entry.settings.get("block_on_match").and_then(|v| v.as_bool()).unwrap_or(false);
            let max_buffer_size = entry.settings.get("max_buffer_size").and_then(|v| v.as_u64()).unwrap_or(4096) as usize;
            let flush_timeout_ms = entry.settings.get("flush_timeout_ms").and_then(|v| v.as_u64()).unwrap_or(2000);
            Ok(Box::new(regex_hider::RegexHiderPlugin::new(entry.name.clone(), scope, patterns, replacement, block_on_match, max_buffer_size, flush_timeout_ms)))
        }
        other => Err(ConfigError(format!("plugin {}: unknown plugin kind `{}`", entry.name, other))),
    }
}
