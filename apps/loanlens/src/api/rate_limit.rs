//! Global request rate limiting.
//!
//! One token bucket shared by every client. Requests over the quota get a
//! 429 with a `Retry-After` header.

use crate::api::error::ApiError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type Limiter = Arc<DefaultDirectRateLimiter>;

/// A limiter allowing `per_second` requests per second, or `None` for 0.
#[must_use]
pub fn limiter(per_second: u32) -> Option<Limiter> {
    NonZeroU32::new(per_second).map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))))
}

/// Middleware: reject the request with 429 when the bucket is empty.
pub async fn limit(State(limiter): State<Limiter>, req: Request, next: Next) -> Response {
    match limiter.check() {
        Ok(()) => next.run(req).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait.as_secs().max(1);
            tracing::warn!(path = %req.uri().path(), retry_after, "rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}
