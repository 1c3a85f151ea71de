//! HTTP/SSE transport for agentflux.
//!
//! Exposes the agent loop over a text event-stream, one protocol event per
//! frame, plus a health check and the tool listing.
//!
//! Built on Axum.

pub mod api_v1;
pub mod error;
pub mod runs;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::header, http::Method, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use agentflux_agent::AgentLoop;
use agentflux_config::AppConfig;

pub use error::GatewayError;
pub use runs::{RunRegistry, RunTicket};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub agent: AgentLoop,
    pub runs: RunRegistry,
}

impl GatewayState {
    pub fn new(config: AppConfig, agent: AgentLoop) -> Self {
        Self {
            config,
            agent,
            runs: RunRegistry::new(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API.
///
/// Conversations travel in full with every request, hence the generous
/// body limit.
pub fn build_router(state: SharedState) -> Router {
    let cors_enabled = state.config.gateway.cors;
    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024));

    let router = if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        )
    } else {
        router
    };

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server with the configured backend and the demo
/// tool registry.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.gateway.bind_address();

    let backend = agentflux_providers::build_from_config(&config)?;
    info!(
        provider = %config.adapter.provider,
        model = %config.adapter.model,
        "Model backend ready"
    );
    let tools = Arc::new(agentflux_tools::default_registry());
    let agent = AgentLoop::from_config(Arc::new(backend), tools, &config.agent);

    let app = build_router(Arc::new(GatewayState::new(config, agent)));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
