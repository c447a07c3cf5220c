use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tower_http::cors::AllowOrigin;

use crate::error::ApiError;
use crate::AppState;

/// Origin predicate for the CORS layer: exact allowlist match, plus loopback
/// origins while HTTPS enforcement is off (local development).
pub fn allow_origin(allowed: Vec<String>, enforce_https: bool) -> AllowOrigin {
    AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let o = match origin.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        };
        if is_loopback_origin(o) {
            return !enforce_https;
        }
        allowed.iter().any(|a| a == o)
    })
}

fn is_loopback_origin(origin: &str) -> bool {
    let host = origin
        .split("://")
        .nth(1)
        .unwrap_or(origin)
        .split([':', '/'])
        .next()
        .unwrap_or("");
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}

/// Scheme enforcement for deployments behind a TLS-terminating proxy: when
/// enabled, plain-HTTP requests (x-forwarded-proto != https) are refused.
pub async fn require_https(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.enforce_https {
        let proto = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        if proto != "https" {
            return Err(ApiError::Forbidden);
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_origin("http://localhost:3000"));
        assert!(is_loopback_origin("http://127.0.0.1"));
        assert!(is_loopback_origin("https://[::1]:8443"));
        assert!(!is_loopback_origin("https://app.example.com"));
        assert!(!is_loopback_origin("https://localhost.example.com"));
    }
}
