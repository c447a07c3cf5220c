use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::AppState;

/// Best-effort client address: proxy headers first, "unknown" as the shared
/// fallback bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(|s| s.trim())
        })
        .unwrap_or("unknown")
        .to_string()
}

/// Sliding-window counter in Redis using the INCR + EXPIRE strategy:
/// the TTL is set only on the first increment so retries do not extend the
/// window. Returns the remaining window seconds on rejection.
pub async fn check_rate_limit(
    redis: &mut redis::aio::MultiplexedConnection,
    key: &str,
    max_requests: u64,
    window_secs: u64,
) -> Result<(), ApiError> {
    let count: u64 = redis::cmd("INCR")
        .arg(key)
        .query_async(redis)
        .await
        .unwrap_or(0);

    if count == 1 {
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(redis)
            .await;
    }

    if count > max_requests {
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(redis)
            .await
            .unwrap_or(window_secs as i64);
        return Err(ApiError::RateLimited {
            message: "Too many requests, please retry later".into(),
            monthly_limit: None,
            retry_after_secs: Some(ttl.max(0) as u64),
        });
    }

    Ok(())
}

async fn enforce_tier(
    state: &AppState,
    headers: &HeaderMap,
    tier: &str,
    max_requests: u64,
) -> Result<(), ApiError> {
    let ip = client_ip(headers);
    let key = format!("rate:{tier}:{ip}");
    let mut redis = state.redis.clone();
    check_rate_limit(&mut redis, &key, max_requests, state.config.rate_limit_window_secs).await
}

/// Baseline tier applied to every route (~120/min per address).
pub async fn global_tier(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_tier(&state, request.headers(), "global", state.config.rate_limit_global_max).await?;
    Ok(next.run(request).await)
}

/// Credential endpoints (~10/min per address).
pub async fn auth_tier(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_tier(&state, request.headers(), "auth", state.config.rate_limit_auth_max).await?;
    Ok(next.run(request).await)
}

/// AI submission endpoints (~5/min per address).
pub async fn ai_tier(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_tier(&state, request.headers(), "ai", state.config.rate_limit_ai_max).await?;
    Ok(next.run(request).await)
}
