//! WebSocket subscriber channels
//!
//! Two channel kinds per room. The device-state channel acknowledges each
//! subscription and then receives pushes from the broadcaster; the combined
//! channel registers raw group-address and device interest with the room's
//! router. Error frames leave a connected channel open; only an unknown room
//! at connect time closes the socket after the frame.

use crate::broadcast::SubscriberChannel;
use crate::error::KnxError;
use crate::gateway::GroupAddress;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Client request on the device-state channel
#[derive(Debug, Default, Deserialize)]
struct DeviceChannelRequest {
    /// Device names to subscribe to
    #[serde(default)]
    subscribe: Vec<String>,
}

/// Client request on the combined channel
#[derive(Debug, Default, Deserialize)]
struct GroupChannelRequest {
    /// Raw group addresses to subscribe to
    #[serde(default)]
    subscribe: Vec<String>,

    /// Device names to subscribe to
    #[serde(default)]
    subscribe_devices: Vec<String>,
}

fn error_frame(error: &KnxError) -> String {
    serde_json::json!({"error": error.to_string()}).to_string()
}

/// Shared-token check at the transport boundary
///
/// Accepts `Authorization: Bearer <token>` or a `token` query parameter.
/// With no token configured the check is disabled.
fn authorized(state: &AppState, headers: &HeaderMap, params: &HashMap<String, String>) -> bool {
    let Some(expected) = state.auth_token.as_deref() else {
        return true;
    };
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if value.strip_prefix("Bearer ") == Some(expected) {
            return true;
        }
    }
    params.get("token").map(String::as_str) == Some(expected)
}

/// Upgrade handler for `/ws/device/{room_id}`
pub async fn device_websocket(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> std::result::Result<Response, StatusCode> {
    if !authorized(&state, &headers, &params) {
        warn!(room_id = %room_id, "rejected unauthenticated device-state channel");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(ws.on_upgrade(move |socket| handle_device_socket(socket, room_id, state)))
}

/// Upgrade handler for `/ws/group/{room_id}`
pub async fn group_websocket(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> std::result::Result<Response, StatusCode> {
    if !authorized(&state, &headers, &params) {
        warn!(room_id = %room_id, "rejected unauthenticated combined channel");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(ws.on_upgrade(move |socket| handle_group_socket(socket, room_id, state)))
}

async fn handle_device_socket(socket: WebSocket, room_id: String, state: AppState) {
    info!(room_id = %room_id, "device-state channel connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    if !state.orchestrator.has_room(&room_id).await {
        let _ = ws_tx
            .send(Message::Text(error_frame(&KnxError::unknown_room(&room_id))))
            .await;
        let _ = ws_tx.close().await;
        return;
    }

    let (channel, rx) = SubscriberChannel::new();
    let writer = spawn_writer(ws_tx, rx);

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let request: DeviceChannelRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(_) => {
                        let _ = channel.send_json(&serde_json::json!({"error": "malformed request"}));
                        continue;
                    }
                };
                for name in request.subscribe {
                    match state.orchestrator.verify_device(&room_id, &name).await {
                        Ok(()) => {
                            state.broadcaster.subscribe(&room_id, &name, &channel).await;
                            let _ = channel
                                .send_json(&serde_json::json!({"subscribed_device": name}));
                        }
                        Err(e) => {
                            let _ = channel.send(error_frame(&e));
                        }
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // Exactly once per channel closure, however the socket went away.
    state.broadcaster.unsubscribe(channel.id()).await;
    writer.abort();
    info!(room_id = %room_id, "device-state channel disconnected");
}

async fn handle_group_socket(socket: WebSocket, room_id: String, state: AppState) {
    info!(room_id = %room_id, "combined channel connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(router) = state.orchestrator.room_router(&room_id).await else {
        let _ = ws_tx
            .send(Message::Text(error_frame(&KnxError::unknown_room(&room_id))))
            .await;
        let _ = ws_tx.close().await;
        return;
    };

    let (channel, rx) = SubscriberChannel::new();
    let writer = spawn_writer(ws_tx, rx);

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let request: GroupChannelRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(_) => {
                        let _ = channel.send_json(&serde_json::json!({"error": "malformed request"}));
                        continue;
                    }
                };
                for address in request.subscribe {
                    match address.parse::<GroupAddress>() {
                        Ok(ga) => {
                            router.subscribe_group(ga, &channel).await;
                            debug!(room_id = %room_id, %ga, "subscribed to group address");
                        }
                        Err(e) => {
                            let _ = channel.send(error_frame(&e));
                        }
                    }
                }
                for name in request.subscribe_devices {
                    match state.orchestrator.verify_device(&room_id, &name).await {
                        Ok(()) => {
                            router.subscribe_device(&name, &channel).await;
                            debug!(room_id = %room_id, device = %name, "subscribed to device");
                        }
                        Err(e) => {
                            let _ = channel.send(error_frame(&e));
                        }
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    router.unsubscribe(channel.id()).await;
    writer.abort();
    info!(room_id = %room_id, "combined channel disconnected");
}

/// Forward queued frames to the socket on a dedicated task
///
/// A stalled socket therefore only ever backs up its own queue; the
/// broadcaster and router never await socket writes.
fn spawn_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    })
}
