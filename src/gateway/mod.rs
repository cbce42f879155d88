//! HTTP gateway: REST surface for the support desk plus the WebSocket
//! live transport.

pub mod api;
pub mod ws;

use crate::config::Config;
use crate::delivery::DeliveryCoordinator;
use crate::identity::{StaticTokenVerifier, TokenVerifier};
use crate::presence::RoomRouter;
use crate::store::SupportStore;
use anyhow::Result;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

const MAX_BODY_SIZE: usize = 65_536;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all gateway routes.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub router: Arc<RoomRouter>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Check if a host string represents a non-localhost bind address.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

/// Build the gateway state from config: store, verifier, room router,
/// delivery coordinator.
pub fn build_state(config: &Config) -> AppState {
    let store = Arc::new(SupportStore::new(&config.data_dir));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(StaticTokenVerifier::new(
        &config.auth.admin_tokens,
        config
            .auth
            .customers
            .iter()
            .map(|c| (c.token.clone(), c.customer_id.clone())),
    ));
    let router = Arc::new(RoomRouter::new(Arc::clone(&verifier)));
    let coordinator = Arc::new(DeliveryCoordinator::new(store, Arc::clone(&router)));
    AppState {
        coordinator,
        router,
        verifier,
    }
}

/// Assemble the route table. Split out from [`run_gateway`] so tests can
/// drive the router without binding a socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        // ── Customer surface ──
        .route("/api/support/conversation", get(api::handle_my_conversation))
        .route(
            "/api/support/conversation/messages",
            get(api::handle_my_messages),
        )
        .route("/api/support/message", post(api::handle_customer_send))
        // ── Admin / shared surface ──
        .route("/api/support/conversations", get(api::handle_list_conversations))
        .route(
            "/api/support/conversations/{id}/messages",
            get(api::handle_conversation_messages),
        )
        .route(
            "/api/support/conversations/{id}/message",
            post(api::handle_send_to_conversation),
        )
        .route(
            "/api/support/conversations/{id}/read",
            post(api::handle_mark_read),
        )
        .route(
            "/api/support/conversations/{id}/resolve",
            post(api::handle_resolve),
        )
        // ── WebSocket live transport ──
        .route("/ws/support", get(ws::handle_ws_support))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway using axum.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "🛑 Refusing to bind to {host} — gateway would be exposed to the internet.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml (NOT recommended)."
        );
    }

    if config.auth.admin_tokens.is_empty() {
        tracing::warn!("no admin tokens configured; admin surface is unreachable");
    }

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = listener.local_addr()?;
    tracing::info!(addr = %display_addr, "support gateway listening");

    let app = build_router(build_state(&config));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/// GET /health — always public (no secrets leaked)
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
