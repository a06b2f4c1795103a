//! HTTP gateway for Baitline.
//!
//! Exposes the turn endpoint, read-only session listing and a health probe
//! over axum, with optional `x-api-key` auth and per-key rate limiting.

/// `x-api-key` auth and rate limiting layers.
pub mod middleware;
/// Per-API-key request allowance.
pub mod rate_limit;
/// Route handlers.
pub mod router;
/// Router assembly and serving.
pub mod server;

pub use middleware::{AuthConfig, API_KEY_HEADER};
pub use rate_limit::RateLimiter;
pub use router::{SessionPage, DEFAULT_PAGE_SIZE};
pub use server::{AppState, GatewayServer};
