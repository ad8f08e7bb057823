//! End-to-end coverage of the axum surface via `tower::ServiceExt::oneshot`,
//! using the in-process `EchoProvider` as a stand-in for every upstream
//! vendor. No socket is bound and no real network call is made.

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use llmgateway::{build_router, GatewayConfig, Registries};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router_from(doc: &str) -> axum::Router {
    let config = GatewayConfig::from_str(doc).expect("valid configuration");
    let registries = Registries::build(&config).expect("registries build");
    build_router(registries, &config)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn auth_gate_rejects_then_admits_with_the_right_key() {
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
plugins:
  - name: auth
    kind: basic-api-key-auth
    priority: 0
    settings:
      keys: ["s3cret"]
"#,
    );

    let body = json!({"model": "echo-model", "messages": [{"role": "user", "content": "hi"}]});

    let unauthed = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(unauthed).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let err = json_body(response).await;
    assert_eq!(err["error"], "unauthorized");
    assert!(err["request_id"].is_string());

    let authed = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer s3cret")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wire = json_body(response).await;
    assert_eq!(wire["choices"][0]["message"]["content"], "hi");
}

#[tokio::test]
async fn regex_hider_blocks_a_matching_request() {
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
plugins:
  - name: hider
    kind: regex-hider
    priority: 0
    settings:
      scope: request
      patterns: ["\\d{3}-\\d{2}-\\d{4}"]
      block_on_match: true
"#,
    );

    let body = json!({"model": "echo-model", "messages": [{"role": "user", "content": "my ssn is 123-45-6789"}]});
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err = json_body(response).await;
    assert_eq!(err["error"], "plugin_rejected");
    assert!(err["request_id"].is_string());
}

#[tokio::test]
async fn regex_hider_redacts_a_non_blocking_request_match_and_echo_reflects_it() {
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
plugins:
  - name: hider
    kind: regex-hider
    priority: 0
    settings:
      scope: request
      patterns: ["\\d{3}-\\d{2}-\\d{4}"]
      replacement: "[SSN]"
      block_on_match: false
"#,
    );

    let body = json!({"model": "echo-model", "messages": [{"role": "user", "content": "call 555-12-3456 back"}]});
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wire = json_body(response).await;
    // The echo provider reflects the last user message back verbatim, so a
    // redaction applied in `before_model` shows up in the echoed reply too.
    assert_eq!(wire["choices"][0]["message"]["content"], "call [SSN] back");
}

#[tokio::test]
async fn model_router_reroutes_to_a_fallback_after_an_upstream_failure() {
    let router = router_from(
        r#"
models:
  - name: primary
    provider: echo
    provider_model: primary
    fail_first: 1
  - name: primary-backup
    provider: echo
    provider_model: primary-backup
plugins:
  - name: router
    kind: model-router
    priority: 0
    settings:
      fallbacks: ["primary", "primary-backup"]
"#,
    );

    let body = json!({"model": "primary", "messages": [{"role": "user", "content": "route me"}]});
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wire = json_body(response).await;
    // The first attempt against `primary` fails and bumps the retry count,
    // which routes the retried attempt to the configured fallback model.
    assert_eq!(wire["model"], "primary-backup");
}

#[tokio::test]
async fn exhausting_retries_surfaces_the_upstream_error() {
    let router = router_from(
        r#"
models:
  - name: flaky
    provider: echo
    provider_model: flaky
    fail_first: 10
"#,
    );

    let body = json!({"model": "flaky", "messages": [{"role": "user", "content": "hi"}]});
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let err = json_body(response).await;
    assert_eq!(err["error"], "upstream_error");
    assert!(err["request_id"].is_string());
}

#[tokio::test]
async fn anthropic_client_gets_anthropic_shaped_unary_and_streaming_responses() {
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
"#,
    );

    let body = json!({
        "model": "echo-model",
        "max_tokens": 64,
        "system": "be terse",
        "messages": [{"role": "user", "content": "translate me"}],
    });
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/anthropic/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wire = json_body(response).await;
    // Anthropic's wire shape, not OpenAI's, even though the serving model is
    // the same in-process echo provider any adapter can reach.
    assert_eq!(wire["type"], "message");
    assert_eq!(wire["content"][0]["type"], "text");
    assert_eq!(wire["content"][0]["text"], "translate me");
    assert_eq!(wire["stop_reason"], "end_turn");

    let streaming_body = json!({
        "model": "echo-model",
        "max_tokens": 64,
        "stream": true,
        "messages": [{"role": "user", "content": "stream this back"}],
    });
    let streaming_request = HttpRequest::builder()
        .method("POST")
        .uri("/anthropic/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(streaming_body.to_string()))
        .unwrap();
    let response = router.oneshot(streaming_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = text_body(response).await;
    assert!(text.contains("event: message_start"));
    assert!(text.contains("event: content_block_delta"));
    assert!(text.contains("event: message_stop"));
    // No OpenAI-style `[DONE]` sentinel leaks into the Anthropic lifecycle.
    assert!(!text.contains("[DONE]"));
}

#[tokio::test]
async fn streaming_regex_hider_coalesces_chunks_until_a_flush_trigger() {
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
plugins:
  - name: hider
    kind: regex-hider
    priority: 0
    settings:
      scope: response
      patterns: ["classified"]
      replacement: "[REDACTED]"
      max_buffer_size: 4096
      flush_timeout_ms: 60000
"#,
    );

    let body = json!({
        "model": "echo-model",
        "stream": true,
        "messages": [{"role": "user", "content": "this is classified information\n"}],
    });
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = text_body(response).await;
    assert!(text.contains("[REDACTED]"));
    assert!(!text.contains("classified"));
    assert!(text.contains("[DONE]"));
}

#[tokio::test]
async fn models_route_scopes_listings_to_the_requested_adapters_provider_family() {
    std::env::set_var("GW_TEST_ANTHROPIC_KEY", "sk-ant-test");
    let router = router_from(
        r#"
models:
  - name: echo-model
    provider: echo
    provider_model: echo-model
  - name: claude-stand-in
    provider: anthropic
    provider_model: claude-3-5-sonnet
    api_key_env: GW_TEST_ANTHROPIC_KEY
"#,
    );

    let request = HttpRequest::builder().method("GET").uri("/openai/models").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["echo-model"]);

    let request = HttpRequest::builder().method("GET").uri("/anthropic/models").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["claude-stand-in"]);
}
