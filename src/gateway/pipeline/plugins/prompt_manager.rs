//! Bundled `prompt-manager` plugin: rewrites the system prompt before it reaches
//! the model. Four modes:
//!
//! - `override`: replace the system prompt outright.
//! - `before`/`after`: prepend/append configured text to whatever the client sent.
//! - `wrapper`: substitute the client's system prompt into a `${PROMPT}`
//!   placeholder in a configured template.
//!
//! An optional A/B experiment routes a percentage of requests to a second
//! variant, keyed by a stable hash of the user id (falling back to the request
//! id) so the same user consistently lands in the same bucket across requests
//! rather than flipping on every call.

use crate::gateway::context::{ContextPatch, RequestContext};
use crate::gateway::model::{Content, Role};
use crate::gateway::pipeline::{Plugin, PluginResult};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Override,
    Before,
    After,
    Wrapper,
}

pub struct Experiment {
    pub variant_text: String,
    /// Percentage (0-100) of requests routed to `variant_text` instead of the
    /// plugin's primary `text`.
    pub variant_weight: u8,
}

pub struct PromptManagerPlugin {
    name: String,
    mode: Mode,
    text: String,
    experiment: Option<Experiment>,
}

impl PromptManagerPlugin {
    pub fn new(name: impl Into<String>, mode: Mode, text: impl Into<String>, experiment: Option<Experiment>) -> Self {
        PromptManagerPlugin { name: name.into(), mode, text: text.into(), experiment }
    }

    fn chosen_text(&self, ctx: &RequestContext) -> &str {
        match &self.experiment {
            Some(exp) => {
                let key = ctx.user_id.as_deref().unwrap_or(&ctx.request_id);
                if bucket(key) < exp.variant_weight {
                    &exp.variant_text
                } else {
                    &self.text
                }
            }
            None => &self.text,
        }
    }

    fn apply(&self, existing: Option<&str>, chosen: &str) -> String {
        match self.mode {
            Mode::Override => chosen.to_string(),
            Mode::Before => match existing {
                Some(e) => format!("{}\n{}", chosen, e),
                None => chosen.to_string(),
            },
            Mode::After => match existing {
                Some(e) => format!("{}\n{}", e, chosen),
                None => chosen.to_string(),
            },
            Mode::Wrapper => chosen.replace("${PROMPT}", existing.unwrap_or("")),
        }
    }
}

/// Deterministic 0-99 bucket for a stable key, via the FNV-1a hash — no
/// randomness dependency needed for a stable A/B split.
fn bucket(key: &str) -> u8 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % 100) as u8
}

#[async_trait]
impl Plugin for PromptManagerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_model(&self, ctx: &RequestContext) -> PluginResult {
        let chosen = self.chosen_text(ctx).to_string();
        let existing_index = ctx.request.messages.iter().position(|m| m.role == Role::System);
        let existing_text = existing_index.map(|i| ctx.request.messages[i].text());
        let new_text = self.apply(existing_text.as_deref(), &chosen);

        let mut request = ctx.request.clone();
        match existing_index {
            Some(i) => request.messages[i].content = vec![Content::text(new_text)],
            None => request.messages.insert(
                0,
                crate::gateway::model::Message {
                    role: Role::System,
                    content: vec![Content::text(new_text)],
                    tool_calls: vec![],
                    tool_call_id: None,
                },
            ),
        }

        let mut patch = ContextPatch::none();
        patch.request = Some(request);
        PluginResult::with_patch(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::{Message, Request};
    use std::collections::HashMap;

    fn ctx(messages: Vec<Message>) -> RequestContext {
        RequestContext::new(
            "req-1".into(),
            "/v1/chat/completions".into(),
            "POST".into(),
            Request {
                model: "gpt-4o".to_string(),
                messages,
                tools: vec![],
                stream: false,
                temperature: None,
                max_tokens: None,
                system: None,
                extra: HashMap::new(),
            },
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn override_replaces_existing_system_prompt() {
        let plugin = PromptManagerPlugin::new("pm", Mode::Override, "be terse", None);
        let c = ctx(vec![Message { role: Role::System, content: vec![Content::text("be verbose")], tool_calls: vec![], tool_call_id: None }]);
        let result = plugin.before_model(&c).await;
        let req = result.patch.request.unwrap();
        assert_eq!(req.messages[0].text(), "be terse");
    }

    #[tokio::test]
    async fn wrapper_substitutes_placeholder() {
        let plugin = PromptManagerPlugin::new("pm", Mode::Wrapper, "Rules:\n${PROMPT}\nEnd.", None);
        let c = ctx(vec![Message { role: Role::System, content: vec![Content::text("be terse")], tool_calls: vec![], tool_call_id: None }]);
        let result = plugin.before_model(&c).await;
        let req = result.patch.request.unwrap();
        assert_eq!(req.messages[0].text(), "Rules:\nbe terse\nEnd.");
    }

    #[tokio::test]
    async fn before_mode_inserts_system_message_when_absent() {
        let plugin = PromptManagerPlugin::new("pm", Mode::Before, "be terse", None);
        let c = ctx(vec![Message::user("hi")]);
        let result = plugin.before_model(&c).await;
        let req = result.patch.request.unwrap();
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].text(), "be terse");
    }

    #[test]
    fn bucket_is_stable_for_the_same_key() {
        assert_eq!(bucket("user-1"), bucket("user-1"));
    }
}
