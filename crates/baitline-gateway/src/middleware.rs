use crate::rate_limit::RateLimiter;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Auth configuration for the gateway.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// API keys that are allowed to call the API. Empty = no auth required.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Returns true if authentication is enabled (at least one key configured).
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }
}

/// Shared middleware state.
pub struct MiddlewareState {
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub auth: AuthConfig,
}

/// `{"detail": ...}` error body.
pub(crate) fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "detail": message.into() })),
    )
        .into_response()
}

fn client_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Auth middleware: validates the `x-api-key` header.
///
/// If no API keys are configured, all requests are allowed.
pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.is_enabled() {
        return next.run(request).await;
    }

    match client_key(&headers) {
        Some(k) if state.auth.accepts(k) => next.run(request).await,
        found => {
            warn!(
                path = %request.uri().path(),
                key_present = found.is_some(),
                "Rejected request: invalid or missing API key"
            );
            let mut response = detail(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("ApiKey"));
            response
        }
    }
}

/// Rate limiting middleware: one allowance per API key.
///
/// Requests without a key share the `anonymous` allowance.
pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };
    if !limiter.check(client_key(&headers).unwrap_or("anonymous")) {
        warn!(path = %request.uri().path(), "Rate limited request");
        return detail(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
    }

    next.run(request).await
}
