use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::json;
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

pub const REQUESTS_PER_MINUTE: u32 = 60;
pub const TASK_REQUESTS_PER_MINUTE: u32 = 10;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub general_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    pub task_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());
        Self {
            general_limiter: Arc::new(RateLimiter::direct(general_quota)),
            task_limiter: Arc::new(RateLimiter::direct(task_quota)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the general quota to every request, and the stricter task quota
/// to `POST /tasks` on top of it.
pub async fn rate_limit_middleware(
    State(config): State<RateLimitConfig>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    if config.general_limiter.check().is_err() {
        warn!(%path, "general rate limit exceeded");
        return Err(too_many_requests());
    }

    if path == "/tasks" && method == axum::http::Method::POST && config.task_limiter.check().is_err() {
        warn!(%path, "task creation rate limit exceeded");
        return Err(too_many_requests());
    }

    Ok(next.run(request).await)
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "Too Many Requests" })),
    )
        .into_response()
}

pub fn extract_client_ip(request: &Request) -> String {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(first_ip) = ip_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }
    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_config_allows_initial_requests() {
        let config = RateLimitConfig::new();
        assert!(config.general_limiter.check().is_ok());
        assert!(config.task_limiter.check().is_ok());
    }

    #[test]
    fn task_limiter_is_stricter_than_general() {
        let config = RateLimitConfig::new();
        let mut task_allowed = 0;
        for _ in 0..(TASK_REQUESTS_PER_MINUTE + 5) {
            if config.task_limiter.check().is_ok() {
                task_allowed += 1;
            }
        }
        assert_eq!(task_allowed, TASK_REQUESTS_PER_MINUTE as usize);
    }
}
