use crate::middleware::{auth_middleware, rate_limit_middleware, AuthConfig, MiddlewareState};
use crate::rate_limit::RateLimiter;
use crate::router::{get_session, health, honeypot, list_sessions};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use baitline_engine::SessionManager;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth or rate limiting.
    pub fn build(manager: Arc<SessionManager>) -> Router {
        Self::build_with_middleware(manager, None, AuthConfig::default())
    }

    /// Build the gateway with optional rate limiting and auth on the API routes.
    ///
    /// `/health` stays outside both layers.
    pub fn build_with_middleware(
        manager: Arc<SessionManager>,
        rate_limiter: Option<Arc<RateLimiter>>,
        auth_config: AuthConfig,
    ) -> Router {
        let state = Arc::new(AppState { manager });

        let api = Router::new()
            .route("/api/v1/honeypot", post(honeypot))
            .route("/api/v1/sessions", get(list_sessions))
            .route("/api/v1/sessions/{session_id}", get(get_session));

        let api = if rate_limiter.is_some() || auth_config.is_enabled() {
            let mw_state = Arc::new(MiddlewareState {
                rate_limiter,
                auth: auth_config,
            });

            // Layers run outermost-last: auth first, then the per-key allowance.
            api.route_layer(axum_mw::from_fn_with_state(
                mw_state.clone(),
                rate_limit_middleware,
            ))
            .route_layer(axum_mw::from_fn_with_state(mw_state, auth_middleware))
        } else {
            api
        };

        api.route("/health", get(health)).with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn serve(
        app: Router,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
