// src/providers/mod.rs
//! Concrete HTTP adapters for the external capabilities.

pub mod feed_http;
pub mod gateway;
pub mod openai;

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{RequestBuilder, Response, StatusCode};

pub use feed_http::HttpFeedSource;
pub use gateway::HttpGateway;
pub use openai::{OpenAiCaptionTransformer, PassthroughTransformer};

pub(crate) const USER_AGENT: &str = concat!("campaign-sync/", env!("CARGO_PKG_VERSION"));

/// Default first backoff step; doubles per attempt.
pub(crate) const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Longest doubling applied to the first backoff step (`backoff << 6`).
const MAX_BACKOFF_SHIFT: u8 = 6;

fn backoff_for(base: Duration, attempt: u8) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base * (1u32 << shift)
}

fn retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send a request built by `build`, retrying transport errors, 5xx and 429
/// with exponential backoff. Other 4xx answers fail immediately.
/// Only for idempotent reads; dispatch is never retried here.
pub(crate) async fn send_with_retry<F>(
    what: &str,
    max_attempts: u8,
    backoff: Duration,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = build().send().await;

        let err = match res {
            Ok(rsp) if rsp.status().is_success() => return Ok(rsp),
            Ok(rsp) if !retryable(rsp.status()) => {
                return Err(anyhow!("{what}: HTTP {}", rsp.status()));
            }
            Ok(rsp) => anyhow!("{what}: HTTP {}", rsp.status()),
            Err(e) => anyhow!("{what}: request failed: {e}"),
        };

        if attempt >= max_attempts {
            return Err(err);
        }
        tracing::debug!(target: "providers", %what, attempt, error = %err, "retrying");
        tokio::time::sleep(backoff_for(backoff, attempt)).await;
    }
}
