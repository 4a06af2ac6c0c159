//! HTTP and WebSocket transport
//!
//! The thin outer surface: status endpoints, the reconfiguration interface
//! consuming room lists produced by the (external) configuration layer, and
//! the two subscriber WebSocket channels.

pub mod ws;

use crate::broadcast::SubscriptionBroadcaster;
use crate::config::{FleetConfig, ServerConfig};
use crate::devices::resolvers::ResolverRegistry;
use crate::error::Result;
use crate::fleet::{ConnectionOrchestrator, ReconfigureSummary};
use crate::gateway::GatewayFactory;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConnectionOrchestrator>,
    pub broadcaster: Arc<SubscriptionBroadcaster>,
    pub auth_token: Option<String>,
}

/// Assemble the application state for a configuration and gateway factory
pub fn build_state(config: &ServerConfig, factory: GatewayFactory) -> AppState {
    let broadcaster = SubscriptionBroadcaster::new();
    let resolvers = Arc::new(ResolverRegistry::with_defaults());
    let orchestrator = Arc::new(ConnectionOrchestrator::new(
        factory,
        broadcaster.clone(),
        resolvers,
        config.gateway.retry.policy(),
    ));
    AppState {
        orchestrator,
        broadcaster,
        auth_token: config.auth.token.clone(),
    }
}

/// Build the axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/config", get(get_configuration))
        .route("/config/apply", post(apply_configuration))
        .route("/state/:room_id/:device", get(get_device_state))
        .route("/ws/device/:room_id", get(ws::device_websocket))
        .route("/ws/group/:room_id", get(ws::group_websocket))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the listener and serve until the process ends
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP transport listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "KNX fleet backend is running. Apply a configuration via /config/apply."
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_configuration(State(state): State<AppState>) -> Json<serde_json::Value> {
    let rooms = state.orchestrator.applied_configuration().await;
    let applied_at = state.orchestrator.applied_at().await;
    Json(serde_json::json!({ "rooms": rooms, "applied_at": applied_at }))
}

async fn apply_configuration(
    State(state): State<AppState>,
    Json(payload): Json<FleetConfig>,
) -> Json<ReconfigureSummary> {
    Json(state.orchestrator.apply_configuration(payload.rooms).await)
}

/// Read a device's current resolved state on demand
async fn get_device_state(
    Path((room_id, device)): Path<(String, String)>,
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.orchestrator.device_snapshot(&room_id, &device).await {
        Ok(snapshot) => Ok(Json(serde_json::json!({
            "room_id": room_id,
            "device": device,
            "state": crate::devices::snapshot::snapshot_to_json(&snapshot),
        }))),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}
