//! The gateway's HTTP surface: a health check, one route pair per supported
//! adapter (`POST /<adapter>/v1/chat/completions` or `/messages`, each also
//! reachable without the `v1` segment, and `GET /<adapter>/models`), each
//! wiring an input adapter, the plugin pipeline, a provider client, and the
//! matching output adapter together for a single request.

use crate::gateway::adapters::{render_frame, OutputAdapter, SseFrame};
use crate::gateway::config::GatewayConfig;
use crate::gateway::context::RequestContext;
use crate::gateway::error::GatewayError;
use crate::gateway::merge::StreamMerger;
use crate::gateway::registry::Registries;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::cors::{Any, CorsLayer};

const MAX_RETRIES: u32 = 2;
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state handed to every axum handler.
struct GatewayState {
    registries: Registries,
}

/// Build the axum [`Router`] for a built [`Registries`] and configured CORS
/// policy, without binding a socket — useful for tests that drive the router
/// with `tower::ServiceExt::oneshot`.
pub fn build_router(registries: Registries, config: &GatewayConfig) -> Router {
    let state = Arc::new(GatewayState { registries });

    let cors = if config.server.cors.origins.is_empty() {
        CorsLayer::new()
    } else if config.server.cors.origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = config.server.cors.origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/health", get(handle_health))
        .route("/{adapter}/v1/chat/completions", post(handle_completion))
        .route("/{adapter}/chat/completions", post(handle_completion))
        .route("/{adapter}/v1/messages", post(handle_completion))
        .route("/{adapter}/messages", post(handle_completion))
        .route("/{adapter}/models", get(handle_models))
        .layer(cors)
        .with_state(state)
}

/// Parse configuration, build the registries, bind a socket, and serve until a
/// shutdown signal arrives.
pub async fn serve(config_raw: &str) -> Result<(), GatewayError> {
    let config = GatewayConfig::from_str(config_raw).map_err(|e| GatewayError::Internal(e.to_string()))?;
    env_logger::Builder::new().parse_filters(&config.logging.level).init();

    let registries = Registries::build(&config).map_err(|e| GatewayError::Internal(e.to_string()))?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = build_router(registries, &config);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    if log::log_enabled!(log::Level::Info) {
        log::info!("gateway listening on {}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if log::log_enabled!(log::Level::Info) {
        log::info!("shutdown signal received, draining in-flight requests");
    }
}

fn header_map_to_strings(headers: &HeaderMap) -> HashMap<String, String> {
    headers.iter().filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string()))).collect()
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn with_request_id_header(mut response: AxumResponse, request_id: &str) -> AxumResponse {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Flattens an error into the wire shape `{"error": "<code>", "message": ...,
/// "request_id": ...}` — callers consuming the gateway's error body expect a
/// plain string `error`, not a nested object.
fn error_response(err: GatewayError, request_id: &str) -> AxumResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({"error": err.code(), "message": err.message(), "request_id": request_id});
    with_request_id_header((status, Json(body)).into_response(), request_id)
}

fn error_sse_data(err: &GatewayError, request_id: &str) -> serde_json::Value {
    json!({"error": err.code(), "message": err.message(), "request_id": request_id})
}

async fn handle_health() -> AxumResponse {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    Json(json!({
        "status": "healthy",
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn handle_models(State(state): State<Arc<GatewayState>>, Path(adapter): Path<String>, headers: HeaderMap) -> AxumResponse {
    let request_id = request_id_from_headers(&headers);
    if state.registries.input_adapter(&adapter).is_none() {
        return error_response(GatewayError::ModelNotConfigured(format!("unknown adapter `{}`", adapter)), &request_id);
    }
    let models = state.registries.model_names_for_adapter(&adapter);
    let body = json!({
        "object": "list",
        "data": models.iter().map(|m| json!({"id": m, "object": "model"})).collect::<Vec<_>>(),
    });
    with_request_id_header(Json(body).into_response(), &request_id)
}

async fn handle_completion(
    State(state): State<Arc<GatewayState>>,
    Path(adapter): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AxumResponse {
    let request_id = request_id_from_headers(&headers);

    let Some(input_adapter) = state.registries.input_adapter(&adapter).cloned() else {
        return error_response(GatewayError::ModelNotConfigured(format!("unknown adapter `{}`", adapter)), &request_id);
    };
    let Some(output_adapter) = state.registries.output_adapter(&adapter).cloned() else {
        return error_response(GatewayError::ModelNotConfigured(format!("unknown adapter `{}`", adapter)), &request_id);
    };

    let request = match input_adapter.parse_request(&body) {
        Ok(r) => r,
        Err(e) => return error_response(e, &request_id),
    };

    let stream_requested = request.stream;
    let mut ctx = RequestContext::new(request_id.clone(), format!("/{}", adapter), "POST".to_string(), request, header_map_to_strings(&headers));
    ctx.raw_body = body.to_vec();
    ctx.session_id = headers.get("x-session-id").and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    if let Err(e) = state.registries.pipeline.run_before_model(&mut ctx).await {
        return error_response(e, &request_id);
    }

    if stream_requested {
        handle_streaming(state, ctx, output_adapter).await
    } else {
        handle_unary(state, ctx, output_adapter).await
    }
}

async fn handle_unary(state: Arc<GatewayState>, mut ctx: RequestContext, output_adapter: Arc<dyn OutputAdapter>) -> AxumResponse {
    let request_id = ctx.request_id.clone();

    let response = match execute_with_retries(&state, &mut ctx).await {
        Ok(r) => r,
        Err(e) => {
            ctx.error = Some(e.message().to_string());
            return error_response(e, &request_id);
        }
    };

    if let Err(e) = state.registries.pipeline.run_after_model(&mut ctx, &response).await {
        ctx.error = Some(e.message().to_string());
        return error_response(e, &request_id);
    }

    ctx.final_chunk = true;
    ctx.accumulated_response = Some(response.clone());
    if let Some(usage) = response.usage {
        ctx.metrics.prompt_tokens = Some(usage.prompt_tokens);
        ctx.metrics.completion_tokens = Some(usage.completion_tokens);
    }
    ctx.metrics.end_ms = Some(SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0));

    let wire = output_adapter.format_response(&ctx.request, &ctx.raw_body, &response);
    state.registries.pipeline.run_detached_after_response(&ctx, &response);
    with_request_id_header(Json(wire).into_response(), &request_id)
}

/// Resolves the context's current model to a configured provider, falling back
/// to the registered default model when the requested name is unknown, and
/// updating the context to reflect whichever model actually serves the
/// request.
fn resolve_provider(
    state: &Arc<GatewayState>,
    ctx: &mut RequestContext,
) -> Result<Arc<dyn crate::gateway::providers::ProviderClient>, GatewayError> {
    let Some((resolved_model, provider)) = state.registries.resolve_model(&ctx.model) else {
        return Err(GatewayError::ModelNotConfigured(format!("model `{}` is not configured", ctx.model)));
    };
    let resolved_model = resolved_model.to_string();
    let provider = provider.clone();
    if resolved_model != ctx.model {
        ctx.model = resolved_model.clone();
        ctx.request.model = resolved_model;
    }
    Ok(provider)
}

/// Retries only the provider call itself, re-running `before_model` between
/// attempts so a `model-router`-style plugin sees the bumped retry count and can
/// reroute to a fallback model — never retries once a streaming response has
/// already produced a chunk.
async fn execute_with_retries(state: &Arc<GatewayState>, ctx: &mut RequestContext) -> Result<crate::gateway::model::Response, GatewayError> {
    let mut attempt = 0;
    loop {
        let provider = resolve_provider(state, ctx)?;

        match provider.execute(&ctx.request).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let retryable = matches!(err, GatewayError::UpstreamError { status: Some(s), .. } if s >= 500)
                    || matches!(err, GatewayError::UpstreamError { status: None, .. })
                    || matches!(err, GatewayError::UpstreamTimeout(_));
                if !retryable || attempt >= MAX_RETRIES {
                    return Err(err);
                }
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("request {}: retrying after upstream error: {}", ctx.request_id, err);
                }
                attempt += 1;
                ctx.retry_count = attempt;
                state.registries.pipeline.run_before_model(ctx).await?;
            }
        }
    }
}

/// Internal progress marker for the streaming body generator below.
enum StreamPhase {
    Forwarding,
    Done,
}

async fn handle_streaming(state: Arc<GatewayState>, mut ctx: RequestContext, output_adapter: Arc<dyn OutputAdapter>) -> AxumResponse {
    let request_id = ctx.request_id.clone();

    let provider = match resolve_provider(&state, &mut ctx) {
        Ok(p) => p,
        Err(e) => return error_response(e, &request_id),
    };

    let chunk_stream = match provider.execute_streaming(&ctx.request).await {
        Ok(s) => s,
        Err(e) => return error_response(e, &request_id),
    };

    let done_sentinel = output_adapter.done_sentinel();
    let framer = output_adapter.new_stream_framer();
    let merger = StreamMerger::new();

    let initial = (chunk_stream, ctx, framer, merger, state.clone(), StreamPhase::Forwarding, request_id.clone(), true);

    let body_stream = futures_util::stream::unfold(
        initial,
        move |(mut chunks, mut ctx, mut framer, mut merger, state, phase, request_id, mut first_chunk)| async move {
            if matches!(phase, StreamPhase::Done) {
                return None;
            }

            loop {
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        let forwarded = match state.registries.pipeline.run_after_chunk(&mut ctx, chunk).await {
                            Ok(forwarded) => forwarded,
                            Err(e) => {
                                let frame = SseFrame { event: Some("error"), data: error_sse_data(&e, &request_id) };
                                let bytes = axum::body::Bytes::from(render_frame(&frame));
                                return Some((bytes, (chunks, ctx, framer, merger, state, StreamPhase::Done, request_id, first_chunk)));
                            }
                        };

                        if forwarded.is_empty() {
                            continue;
                        }

                        let mut out = String::new();
                        for c in &forwarded {
                            merger.merge(c);
                            ctx.final_chunk = c.finish_reason.is_some();
                            let accumulated = merger.finalize();
                            for frame in framer.frames_for_chunk(&ctx.request, &ctx.raw_body, c, first_chunk, ctx.final_chunk, &accumulated) {
                                out.push_str(&render_frame(&frame));
                            }
                            ctx.accumulated_response = Some(accumulated);
                            first_chunk = false;
                        }
                        return Some((axum::body::Bytes::from(out), (chunks, ctx, framer, merger, state, StreamPhase::Forwarding, request_id, first_chunk)));
                    }
                    Some(Err(e)) => {
                        let frame = SseFrame { event: Some("error"), data: error_sse_data(&e, &request_id) };
                        let bytes = axum::body::Bytes::from(render_frame(&frame));
                        return Some((bytes, (chunks, ctx, framer, merger, state, StreamPhase::Done, request_id, first_chunk)));
                    }
                    None => {
                        ctx.final_chunk = true;
                        let final_response = merger.finalize();
                        ctx.accumulated_response = Some(final_response.clone());
                        if let Some(usage) = final_response.usage {
                            ctx.metrics.prompt_tokens = Some(usage.prompt_tokens);
                            ctx.metrics.completion_tokens = Some(usage.completion_tokens);
                        }
                        ctx.metrics.end_ms = Some(SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0));
                        state.registries.pipeline.run_detached_after_response(&ctx, &final_response);

                        let mut out = String::new();
                        for frame in framer.closing_frames(&ctx.request, &ctx.raw_body, &final_response) {
                            out.push_str(&render_frame(&frame));
                        }
                        out.push_str(&done_sentinel_line(done_sentinel));
                        return Some((axum::body::Bytes::from(out), (chunks, ctx, framer, merger, state, StreamPhase::Done, request_id, first_chunk)));
                    }
                }
            }
        },
    );

    let response = AxumResponse::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(Body::from_stream(body_stream.map(Ok::<_, std::convert::Infallible>)))
        .unwrap_or_else(|_| error_response(GatewayError::Internal("failed to build streaming response".to_string()), &request_id));
    with_request_id_header(response, &request_id)
}

fn done_sentinel_line(sentinel: Option<&'static str>) -> String {
    match sentinel {
        Some(s) => format!("data: {}\n\n", s),
        None => String::new(),
    }
}
