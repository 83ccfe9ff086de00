//! Debug HTTP server of the collector
//!
//! Exposes liveness, per-porter stats and the mock injection path that feeds
//! payloads straight into a porter's dispatch queue. Not meant for production
//! traffic.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/porters` - Counters and mastership of every porter
//! - `POST /api/v1/mock` - Inject `{"name", "message"}` into the named porter

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{HealthResponse, MockRequest, MockResponse, PortersResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::collector::Shutdown;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "127.0.0.1:8089")
    pub bind_addr: SocketAddr,

    /// Optional authentication token
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8089)),
            auth_token: None,
        }
    }
}

impl From<&crate::config::DebugApiConfig> for ApiConfig {
    fn from(config: &crate::config::DebugApiConfig) -> Self {
        Self {
            bind_addr: config.bind,
            auth_token: config.auth_token.clone(),
        }
    }
}

/// Build the router with every route and layer
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/porters", get(routes::porters::list_porters))
        .route("/api/v1/mock", post(routes::mock::mock_message))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task that stops on
/// shutdown. Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    mut shutdown: Shutdown,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await });
        if let Err(e) = serve.await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
