//! Gateway configuration: typed structs deserialised from YAML or JSON, with
//! `${VAR}`/`$VAR` environment-variable expansion applied to string values before
//! deserialisation.
//!
//! This module does not validate cross-field consistency (e.g. that every plugin
//! named in a model's `plugins` list actually exists in `plugins[]`) — that check
//! happens once, at registry construction time, in [`crate::gateway::registry`].

use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    /// Names of dynamically loaded extension modules. Acknowledged for schema
    /// compatibility; the gateway does not load code at runtime.
    #[serde(default)]
    pub available_extensions: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            cors: CorsConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub origins: Vec<String>,
}

/// One entry in `models[]`: the model name clients request, which provider serves
/// it, and the default plugin chain applied to requests for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub provider: String,
    pub provider_model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Only consulted for `provider: echo`: makes the in-process test double
    /// fail this many calls with a retryable upstream error before it starts
    /// echoing normally, so integration tests can exercise the dispatcher's
    /// retry loop without a flaky real upstream.
    #[serde(default)]
    pub fail_first: u32,
    /// Marks this model as the fallback target when a request names a model
    /// that isn't configured. Last registration wins if more than one model
    /// sets this.
    #[serde(default)]
    pub is_default: bool,
}

/// One entry in `plugins[]`: an instantiated plugin, its phase conditions, and its
/// free-form settings blob (shape is plugin-specific, parsed lazily by each
/// plugin's constructor).
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: PluginConditions,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConditions {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    /// Maps a header name to a required value pattern (literal prefix, or a
    /// regular expression when prefixed with `regex:`). A request must carry
    /// the header and match the pattern for every entry here.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Parse a YAML (or JSON, which is a YAML subset) configuration document,
    /// expanding `${VAR}`/`$VAR` references against the process environment first.
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(raw);
        serde_yaml::from_str(&expanded).map_err(|e| ConfigError(format!("invalid configuration: {}", e)))
    }

    pub fn model_by_name(&self, name: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn plugin_by_name(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

/// Replace `${VAR}` and bare `$VAR` occurrences with the corresponding environment
/// variable's value. References to variables that aren't set are left untouched so
/// that a missing optional secret doesn't corrupt unrelated YAML.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    let bytes = raw.as_bytes();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        if bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = raw[i + 2..].find('}') {
                let name = &raw[i + 2..i + 2 + end];
                push_var(&mut out, name, &format!("${{{}}}", name));
                for _ in 0..(end + 2) {
                    chars.next();
                }
                continue;
            }
        }

        let start = i + 1;
        let mut end = start;
        for (j, cc) in raw[start..].char_indices() {
            if cc.is_alphanumeric() || cc == '_' {
                end = start + j + cc.len_utf8();
            } else {
                break;
            }
        }
        if end > start {
            let name = &raw[start..end];
            push_var(&mut out, name, &format!("${}", name));
            for _ in 0..(end - start) {
                chars.next();
            }
        } else {
            out.push('$');
        }
    }
    out
}

fn push_var(out: &mut String, name: &str, fallback: &str) {
    match std::env::var(name) {
        Ok(val) => out.push_str(&val),
        Err(_) => out.push_str(fallback),
    }
}

/// Small helper used by config-driven plugin constructors to pull typed fields out
/// of a plugin's free-form `settings` blob.
pub fn setting_str<'a>(settings: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    settings.get(key).and_then(|v| v.as_str())
}

pub fn setting_map(settings: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    settings
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_vars() {
        std::env::set_var("GW_TEST_KEY", "sk-123");
        let raw = "key: ${GW_TEST_KEY}\nother: $GW_TEST_KEY-suffix";
        let expanded = expand_env(raw);
        assert_eq!(expanded, "key: sk-123\nother: sk-123-suffix");
    }

    #[test]
    fn leaves_unset_vars_untouched() {
        std::env::remove_var("GW_TEST_MISSING");
        let expanded = expand_env("key: ${GW_TEST_MISSING}");
        assert_eq!(expanded, "key: ${GW_TEST_MISSING}");
    }

    #[test]
    fn parses_full_document() {
        std::env::set_var("GW_TEST_OPENAI_KEY", "sk-abc");
        let doc = r#"
server:
  host: 127.0.0.1
  port: 9000
  cors:
    origins: ["*"]
models:
  - name: gpt-4o
    provider: openai
    provider_model: gpt-4o
    api_key_env: GW_TEST_OPENAI_KEY
    plugins: [auth]
plugins:
  - name: auth
    kind: basic-api-key-auth
    priority: 0
    settings:
      keys: ["client-key-1"]
"#;
        let cfg = GatewayConfig::from_str(doc).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.models.len(), 1);
        assert_eq!(cfg.models[0].name, "gpt-4o");
        assert_eq!(cfg.plugins[0].kind, "basic-api-key-auth");
    }
}
