//! Gateway middleware.

use std::net::SocketAddr;
use std::num::NonZeroU32;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};

use crate::auth::ApiError;
use crate::server::GatewayState;

/// Per-client rate limiter for credential endpoints.
pub struct GatewayRateLimiter {
    client_limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl GatewayRateLimiter {
    /// Create a new rate limiter.
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            client_limiter: RateLimiter::keyed(quota),
        }
    }

    /// Check if a request is allowed.
    #[must_use]
    pub fn check(&self, client_id: &str) -> bool {
        self.client_limiter
            .check_key(&client_id.to_string())
            .is_ok()
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.client_limiter.retain_recent();
    }
}

impl Default for GatewayRateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Reject credential attempts beyond the per-address quota.
///
/// Without connection info (tests, some proxies) all clients share one key.
pub async fn limit_credentials(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    if !state.limiter.check(&client) {
        tracing::warn!(client = %client, path = %request.uri().path(), "Rate limited");
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_client() {
        let limiter = GatewayRateLimiter::new(2);

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn test_zero_quota_still_allows_one() {
        let limiter = GatewayRateLimiter::new(0);
        assert!(limiter.check("client"));
    }
}
