use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::sync::Arc;
use std::time::Duration;
use task_local_extensions::Extensions;

/// Paces outbound calls through a single client to at most one permit per
/// `Quota`'s period. Calls block (no busy-waiting — governor's waiter is
/// timer-based) until a permit is free.
pub struct RateLimiterMiddleware {
    lim: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    jitter: Jitter,
}

impl RateLimiterMiddleware {
    pub fn new(quota: Quota) -> Self {
        Self {
            lim: Arc::new(RateLimiter::direct(quota)),
            jitter: Jitter::new(Duration::from_millis(50), Duration::from_millis(150)),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimiterMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.lim.until_ready_with_jitter(self.jitter).await;
        next.run(req, extensions).await
    }
}
