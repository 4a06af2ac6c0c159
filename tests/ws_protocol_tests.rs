//! End-to-end WebSocket protocol tests
//!
//! Runs the real axum server on an ephemeral port and drives it with a
//! tokio-tungstenite client against the mock gateway network.

use futures_util::{SinkExt, StreamExt};
use knx_fleet_rust::config::{DeviceConfig, RoomConfig, ServerConfig};
use knx_fleet_rust::gateway::{GroupAddress, Telegram, TelegramValue};
use knx_fleet_rust::mock::MockNetwork;
use knx_fleet_rust::server::{build_state, create_router, AppState};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    network: MockNetwork,
    state: AppState,
    addr: SocketAddr,
}

async fn start_server(config: ServerConfig) -> TestServer {
    let network = MockNetwork::new();
    let state = build_state(&config, network.factory());
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        network,
        state,
        addr,
    }
}

async fn start_server_with_room() -> TestServer {
    let server = start_server(ServerConfig::default()).await;
    let summary = server
        .state
        .orchestrator
        .apply_configuration(vec![RoomConfig {
            room_id: "living".to_string(),
            gateway_address: "10.0.0.2".to_string(),
            devices: vec![
                DeviceConfig {
                    name: "Lamp".to_string(),
                    device_type: "Switch".to_string(),
                    group_address: Some("1/0/1".to_string()),
                    ..DeviceConfig::default()
                },
                DeviceConfig {
                    name: "Thermostat".to_string(),
                    device_type: "Sensor".to_string(),
                    group_address_state: Some("2/0/1".to_string()),
                    value_type: Some("temperature".to_string()),
                    ..DeviceConfig::default()
                },
            ],
        }])
        .await;
    assert_eq!(summary.configured, 1);
    server
}

async fn connect(server: &TestServer, path: &str) -> WsClient {
    let url = format!("ws://{}{}", server.addr, path);
    let (client, _) = connect_async(url).await.expect("WebSocket connect failed");
    client
}

async fn recv_json(client: &mut WsClient) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed unexpectedly")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}

#[tokio::test]
async fn test_device_channel_subscribe_ack_and_push() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/device/living").await;

    send_json(&mut client, serde_json::json!({"subscribe": ["Thermostat"]})).await;
    let ack = recv_json(&mut client).await;
    assert_eq!(ack["subscribed_device"], "Thermostat");

    let ga: GroupAddress = "2/0/1".parse().unwrap();
    server
        .network
        .inject("10.0.0.2", Telegram::response(ga, TelegramValue::Number(20.5)));

    let frame = recv_json(&mut client).await;
    assert_eq!(frame["device"], "Thermostat");
    assert_eq!(frame["room_id"], "living");
    assert_eq!(frame["state"]["value"], 20.5);
    assert_eq!(frame["state"]["unit"], "°C");
    // The structured state address crossed the wire as its canonical string.
    assert_eq!(frame["state"]["group_address_state"], "2/0/1");
}

#[tokio::test]
async fn test_device_channel_unknown_room_closes_after_error() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/device/ghost").await;

    let frame = recv_json(&mut client).await;
    assert_eq!(frame["error"], "Room not found: ghost");

    // The server closes the socket after the error frame.
    let next = tokio::time::timeout(RECV_TIMEOUT, client.next())
        .await
        .expect("timed out waiting for close");
    match next {
        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_device_channel_unknown_device_keeps_channel_open() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/device/living").await;

    send_json(&mut client, serde_json::json!({"subscribe": ["Ghost"]})).await;
    let frame = recv_json(&mut client).await;
    assert_eq!(frame["error"], "Device not found: Ghost");

    // Channel is still usable after the error frame.
    send_json(&mut client, serde_json::json!({"subscribe": ["Lamp"]})).await;
    let ack = recv_json(&mut client).await;
    assert_eq!(ack["subscribed_device"], "Lamp");
}

#[tokio::test]
async fn test_malformed_request_yields_error_frame() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/device/living").await;

    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    let frame = recv_json(&mut client).await;
    assert_eq!(frame["error"], "malformed request");

    send_json(&mut client, serde_json::json!({"subscribe": ["Lamp"]})).await;
    let ack = recv_json(&mut client).await;
    assert_eq!(ack["subscribed_device"], "Lamp");
}

#[tokio::test]
async fn test_group_channel_raw_and_device_frames() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/group/living").await;

    send_json(
        &mut client,
        serde_json::json!({"subscribe": ["1/0/1"], "subscribe_devices": ["Lamp"]}),
    )
    .await;
    // No per-subscribe ack on this channel; give the registrations a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ga: GroupAddress = "1/0/1".parse().unwrap();
    server
        .network
        .inject("10.0.0.2", Telegram::write(ga, TelegramValue::Bool(true)));

    let mut raw_seen = false;
    let mut device_seen = false;
    for _ in 0..2 {
        let frame = recv_json(&mut client).await;
        if frame.get("group_address").is_some() {
            assert_eq!(frame["group_address"], "1/0/1");
            assert_eq!(frame["value"], true);
            raw_seen = true;
        } else {
            assert_eq!(frame["device"], "Lamp");
            assert_eq!(frame["state"]["state"], true);
            device_seen = true;
        }
    }
    assert!(raw_seen && device_seen);
}

#[tokio::test]
async fn test_group_channel_invalid_address_error() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/group/living").await;

    send_json(&mut client, serde_json::json!({"subscribe": ["99/0/0"]})).await;
    let frame = recv_json(&mut client).await;
    assert!(frame["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid address"));
}

#[tokio::test]
async fn test_auth_token_required_when_configured() {
    let mut config = ServerConfig::default();
    config.auth.token = Some("secret".to_string());
    let server = start_server(config).await;
    server
        .state
        .orchestrator
        .apply_configuration(vec![RoomConfig {
            room_id: "living".to_string(),
            gateway_address: "10.0.0.2".to_string(),
            devices: Vec::new(),
        }])
        .await;

    // Without the token the upgrade is rejected.
    let url = format!("ws://{}/ws/device/living", server.addr);
    match connect_async(url.clone()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected 401 rejection, got {other:?}"),
    }

    // Query-parameter token is accepted.
    let (_client, _) = connect_async(format!("{url}?token=secret"))
        .await
        .expect("token connect failed");

    // Bearer header is accepted.
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer secret".parse().unwrap());
    let (_client, _) = connect_async(request)
        .await
        .expect("bearer connect failed");
}

#[tokio::test]
async fn test_abrupt_close_unsubscribes_channel() {
    let server = start_server_with_room().await;
    let mut client = connect(&server, "/ws/device/living").await;

    send_json(&mut client, serde_json::json!({"subscribe": ["Lamp"]})).await;
    recv_json(&mut client).await;
    assert_eq!(server.state.broadcaster.stats().await.channels, 1);

    drop(client);

    // The server notices the closed socket and runs the unsubscribe path.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if server.state.broadcaster.stats().await.channels == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "channel was never unsubscribed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_config_apply_endpoint_returns_summary() {
    let server = start_server(ServerConfig::default()).await;
    server.network.set_unreachable("10.0.0.1");

    let client = http_request_json(
        server.addr,
        "POST",
        "/config/apply",
        Some(serde_json::json!({
            "rooms": [
                {"room_id": "A", "gateway_address": "10.0.0.1", "devices": []},
                {"room_id": "B", "gateway_address": "10.0.0.2", "devices": []},
            ]
        })),
    )
    .await;

    assert_eq!(client["status"], "partial");
    assert_eq!(client["configured"], 1);
    assert_eq!(client["failed_rooms"], serde_json::json!(["A"]));
}

#[tokio::test]
async fn test_device_state_endpoint() {
    let server = start_server_with_room().await;

    let ga: GroupAddress = "1/0/1".parse().unwrap();
    server
        .network
        .inject("10.0.0.2", Telegram::write(ga, TelegramValue::Bool(true)));

    // Poll until the room listener has applied the telegram.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let body = http_request_json(server.addr, "GET", "/state/living/Lamp", None).await;
        if body["state"]["state"] == true {
            assert_eq!(body["room_id"], "living");
            assert_eq!(body["device"], "Lamp");
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "device state never updated: {body}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let missing = http_request_json(server.addr, "GET", "/state/living/Ghost", None).await;
    assert_eq!(missing["error"], "Device not found: Ghost");
}

/// Minimal HTTP request over a raw socket
async fn http_request_json(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> serde_json::Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .expect("response has no body");
    serde_json::from_str(body.trim()).expect("body is not valid JSON")
}
