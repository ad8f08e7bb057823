//! The provider client contract: issue a chat completion against a configured
//! upstream vendor, unary or streaming, with a shared retry policy layered on top.

pub mod anthropic;
pub mod echo;
pub mod openai;
pub mod sse;

use crate::gateway::error::GatewayError;
use crate::gateway::model::{Chunk, Request, Response};
use async_trait::async_trait;
use futures_util::Stream;
use lazy_static::lazy_static;
use std::pin::Pin;
use std::time::Duration;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, GatewayError>> + Send>>;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling, reused by every
    /// provider client so TLS sessions and DNS lookups stay warm across requests.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// A configured upstream vendor connection. One instance is built per `models[]`
/// entry in the gateway configuration and reused across requests for that model.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<Response, GatewayError>;

    async fn execute_streaming(&self, request: &Request) -> Result<ChunkStream, GatewayError>;

    /// The model identifier to send upstream, overriding whatever the client
    /// requested — set when a `models[]` entry pins a gateway-facing name to a
    /// specific upstream model.
    fn upstream_model(&self) -> &str;
}

/// Runs `attempt` up to `max_retries + 1` times with exponential backoff,
/// stopping immediately on a 4xx-shaped error (the request itself is the
/// problem; retrying will not help) and never retrying once a streaming call has
/// already yielded its first chunk (the caller is responsible for only invoking
/// this around [`ProviderClient::execute`] and the *initial* connect of
/// [`ProviderClient::execute_streaming`], not mid-stream).
pub async fn retry_unary<F, Fut, T>(max_retries: u32, base_delay: Duration, mut attempt: F) -> Result<T, GatewayError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let mut tries = 0;
    loop {
        match attempt(tries).await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let retryable = match &err {
                    GatewayError::UpstreamError { status, .. } => status.map(|s| s >= 500).unwrap_or(true),
                    GatewayError::UpstreamTimeout(_) => true,
                    _ => false,
                };
                if !retryable || tries >= max_retries {
                    return Err(err);
                }
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("retrying upstream call (attempt {} of {}): {}", tries + 1, max_retries, err);
                }
                tokio::time::sleep(base_delay * 2u32.pow(tries)).await;
                tries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_immediately_on_4xx() {
        let calls = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry_unary(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::UpstreamError { status: Some(400), message: "bad request".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_5xx_up_to_the_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry_unary(2, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::UpstreamError { status: Some(503), message: "down".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_a_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_unary(3, Duration::from_millis(1), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GatewayError::UpstreamTimeout("slow".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
