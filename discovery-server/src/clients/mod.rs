//! C1: the shared rate-limited HTTP client base (spec §4.1).
//!
//! Every outbound client in this module family is built from
//! [`reqwest_client_builder`] and paced by a [`rate_limiter::RateLimiterMiddleware`]
//! sized to that service's quota. Retrying on a rate-limit signal is *not*
//! a generic transient-error policy here (503 alone would over-trigger on
//! plain server hiccups) — it is the narrow predicate the spec defines
//! (§4.1: HTTP 503, or "rate limit" appearing in the response body), applied
//! at the call site in [`get_with_retry`] so each client can decide what a
//! successful decode looks like.

pub mod canonical;
pub mod discogs;
pub mod lastfm;
pub mod library;
pub mod llm;
mod rate_limiter;

pub use rate_limiter::RateLimiterMiddleware;

use crate::config::USER_AGENT;
use crate::errors::AppResult;
use crate::models::Artist;
use http_cache_reqwest::{Cache, CacheMode, HttpCache, MokaManager};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Bare `reqwest::Client` with the shared User-Agent and timeout, wrapped
/// for middleware composition. Each service layers its own rate limiter
/// (and, for cacheable GET-based lookups, an HTTP response cache) on top.
pub fn reqwest_client_builder(timeout: Duration) -> reqwest_middleware::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert("User-Agent", USER_AGENT.parse().unwrap());

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(DEFAULT_TIMEOUT)
        .default_headers(headers)
        .build()
        .expect("failed to build base reqwest client");

    reqwest_middleware::ClientBuilder::new(client)
}

pub fn default_cache_middleware() -> Cache<MokaManager> {
    Cache(HttpCache {
        mode: CacheMode::ForceCache,
        manager: MokaManager::default(),
        options: None,
    })
}

/// True when a response should be retried per spec §4.1's rate-limit
/// predicate: HTTP 503, or the literal phrase "rate limit" anywhere in the
/// body (case-insensitive). Pure so it is trivially unit-testable.
pub fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::SERVICE_UNAVAILABLE || body.to_lowercase().contains("rate limit")
}

/// Sends the request built fresh by `build` (a closure so the request can
/// be rebuilt identically on each attempt — `RequestBuilder` isn't
/// cheaply cloneable), retrying with `2^attempt` second backoff up to
/// `max_retries` times when [`is_rate_limited`] says so. Any other error
/// (including a non-retryable non-200 status) is returned immediately —
/// data/format errors are never retried (spec §7).
pub async fn get_with_retry(
    build: impl Fn() -> RequestBuilder,
    max_retries: u32,
) -> AppResult<(StatusCode, String)> {
    let mut attempt = 0u32;
    loop {
        let response = build().send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if is_rate_limited(status, &body) && attempt < max_retries {
            let delay = Duration::from_secs(2u64.saturating_pow(attempt));
            warn!(%status, attempt, ?delay, "upstream signalled a rate limit, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        debug!(%status, attempt, "upstream call completed");
        return Ok((status, body));
    }
}

/// Capability shared by the two enrichment clients (spec §9, "Polymorphism
/// over enrichment sources"): C7 holds a `Vec<Box<dyn EnrichmentSource>>` and
/// iterates it without knowing the concrete sources. Every implementation
/// degrades gracefully — a missing credential or a failed call is recorded
/// on the artist's `verified` map, never propagated as an error.
#[async_trait::async_trait]
pub trait EnrichmentSource: Send + Sync {
    async fn enrich_in_place(&self, artist: &mut Artist);
    fn source_name(&self) -> &'static str;
}

pub(crate) fn moka_client(
    quota: governor::Quota,
    timeout: Duration,
) -> ClientWithMiddleware {
    reqwest_client_builder(timeout)
        .with(default_cache_middleware())
        .with(RateLimiterMiddleware::new(quota))
        .build()
}
