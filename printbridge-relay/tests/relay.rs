use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use printbridge_common::{BridgeMessage, LineItem, PrintJob, PrintStatusReport, ServiceType};
use printbridge_relay::{serve, AppState, RelayHandle, RelaySettings};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "s3cret-bridge-key";

async fn start_relay(settings: RelaySettings) -> (SocketAddr, RelayHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = RelayHandle::default();
    let state = AppState::new(relay.clone(), &settings);
    tokio::spawn(serve(listener, state, std::future::pending()));
    (addr, relay)
}

fn settings() -> RelaySettings {
    RelaySettings {
        secret: SECRET.into(),
        ..RelaySettings::default()
    }
}

async fn connect_bridge(addr: SocketAddr, secret: &str) -> Result<Ws, WsError> {
    let url = format!("ws://{addr}/printer-ws?secret={secret}");
    connect_async(url).await.map(|(ws, _)| ws)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_message(ws: &mut Ws) -> Option<BridgeMessage> {
    loop {
        match timeout(Duration::from_secs(2), ws.next()).await.ok()?? {
            Ok(Message::Text(text)) => return BridgeMessage::decode(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

fn job(order_id: &str) -> PrintJob {
    PrintJob {
        id: "cl_1".into(),
        order_id_string: order_id.into(),
        customer_name: "Meera".into(),
        customer_mobile: "9811111111".into(),
        service_type: ServiceType::DineIn,
        table_number: Some("4".into()),
        address: None,
        pickup_time: None,
        total_amount: 310.5,
        items: vec![LineItem {
            name: "Veg Biryani".into(),
            quantity: 1,
            price: 310.5,
        }],
        created_at: Utc::now(),
    }
}

fn assert_unauthorized(result: Result<Ws, WsError>) {
    match result {
        Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), 401),
        Err(e) => panic!("expected 401, got error {e}"),
        Ok(_) => panic!("expected 401, upgrade succeeded"),
    }
}

#[tokio::test]
async fn test_no_bridge_connected() {
    let (_addr, relay) = start_relay(settings()).await;
    assert!(!relay.is_printer_connected());
    assert!(!relay.send_to_printer(&job("X")));
}

#[tokio::test]
async fn test_wrong_secrets_are_rejected() {
    let (addr, relay) = start_relay(settings()).await;

    // empty, truncated, different case, same length with one byte off, longer
    for secret in [
        "",
        "s3cret-bridge",
        "S3CRET-BRIDGE-KEY",
        "s3cret-bridge-kez",
        "s3cret-bridge-key2",
    ] {
        assert_unauthorized(connect_bridge(addr, secret).await);
    }

    let no_param = connect_async(format!("ws://{addr}/printer-ws")).await.map(|(ws, _)| ws);
    assert_unauthorized(no_param);

    sleep(Duration::from_millis(50)).await;
    assert!(!relay.is_printer_connected());
    assert!(relay.registry().current_id().is_none());
}

#[tokio::test]
async fn test_relay_without_secret_rejects_everyone() {
    let (addr, relay) = start_relay(RelaySettings::default()).await;
    assert_unauthorized(connect_bridge(addr, "anything").await);
    assert!(!relay.is_printer_connected());
}

#[tokio::test]
async fn test_secret_in_header() {
    let (addr, relay) = start_relay(settings()).await;
    let mut request = format!("ws://{addr}/printer-ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-printer-secret", HeaderValue::from_static(SECRET));
    let (_ws, _) = connect_async(request).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;
}

#[tokio::test]
async fn test_dispatch_reaches_bridge_once() {
    let (addr, relay) = start_relay(settings()).await;
    let mut ws = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;

    let sent = job("ord_7f3a9c21");
    assert!(relay.send_to_printer(&sent));

    match next_message(&mut ws).await {
        Some(BridgeMessage::OrderPrint { order }) => assert_eq!(order, sent),
        other => panic!("expected ORDER_PRINT, got {other:?}"),
    }
    assert!(timeout(Duration::from_millis(150), ws.next()).await.is_err());
}

#[tokio::test]
async fn test_ping_and_print_status() {
    let (addr, relay) = start_relay(settings()).await;
    let mut ws = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;

    ws.send(Message::Text(BridgeMessage::Ping.encode().unwrap().into()))
        .await
        .unwrap();
    assert_eq!(next_message(&mut ws).await, Some(BridgeMessage::Pong));

    let failed = BridgeMessage::PrintStatus(PrintStatusReport::failed("ord_1", "Paper out"));
    ws.send(Message::Text(failed.encode().unwrap().into()))
        .await
        .unwrap();
    ws.send(Message::Text("garbage".into())).await.unwrap();

    // still alive and answering
    ws.send(Message::Text(BridgeMessage::Ping.encode().unwrap().into()))
        .await
        .unwrap();
    assert_eq!(next_message(&mut ws).await, Some(BridgeMessage::Pong));
    assert!(relay.is_printer_connected());
}

#[tokio::test]
async fn test_connect_disconnect_connect() {
    let (addr, relay) = start_relay(settings()).await;

    let mut first = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;
    first.close(None).await.unwrap();
    wait_until(|| !relay.is_printer_connected()).await;
    assert!(!relay.send_to_printer(&job("after-close")));

    let mut second = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;
    assert!(relay.send_to_printer(&job("ord_second")));
    match next_message(&mut second).await {
        Some(BridgeMessage::OrderPrint { order }) => assert_eq!(order.order_id_string, "ord_second"),
        other => panic!("expected ORDER_PRINT, got {other:?}"),
    }

    drop(second);
    wait_until(|| !relay.is_printer_connected()).await;
}

#[tokio::test]
async fn test_new_bridge_replaces_old() {
    let (addr, relay) = start_relay(settings()).await;

    let mut first = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;
    let first_id = relay.registry().current_id().unwrap();

    let mut second = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.registry().current_id().is_some_and(|id| id != first_id)).await;

    // the replaced socket is closed by the relay
    assert_eq!(next_message(&mut first).await, None);
    assert!(relay.is_printer_connected());

    assert!(relay.send_to_printer(&job("ord_latest")));
    match next_message(&mut second).await {
        Some(BridgeMessage::OrderPrint { order }) => assert_eq!(order.order_id_string, "ord_latest"),
        other => panic!("expected ORDER_PRINT, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_endpoint() {
    let (addr, relay) = start_relay(settings()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/print");

    let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["connected"], false);
    assert_eq!(body["status"], "Printer bridge NOT connected");

    let _ws = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;

    let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["connected"], true);

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "ok");
}

#[tokio::test]
async fn test_manual_print_endpoint() {
    let (addr, relay) = start_relay(settings()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/print");
    let order = serde_json::to_value(job("ord_manual")).unwrap();

    let resp = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .post(&url)
        .json(&json!({ "order": order }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    let mut ws = connect_bridge(addr, SECRET).await.unwrap();
    wait_until(|| relay.is_printer_connected()).await;

    let resp = client
        .post(&url)
        .json(&json!({ "order": order }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    match next_message(&mut ws).await {
        Some(BridgeMessage::OrderPrint { order }) => assert_eq!(order.order_id_string, "ord_manual"),
        other => panic!("expected ORDER_PRINT, got {other:?}"),
    }
}

#[tokio::test]
async fn test_manual_print_requires_admin_token() {
    let (addr, _relay) = start_relay(RelaySettings {
        admin_token: Some("admin-token".into()),
        ..settings()
    })
    .await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/print");
    let body = json!({ "order": serde_json::to_value(job("ord_x")).unwrap() });

    let resp = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client
        .post(&url)
        .bearer_auth("admin-token")
        .json(&body)
        .send()
        .await
        .unwrap();
    // authorised, but no bridge is connected
    assert_eq!(resp.status().as_u16(), 503);
}

#[tokio::test]
async fn test_manual_print_checks_token_before_body() {
    let (addr, _relay) = start_relay(RelaySettings {
        admin_token: Some("admin-token".into()),
        ..settings()
    })
    .await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/print");

    // no content type, unparseable body
    let resp = client.post(&url).body("{not json").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let resp = client.post(&url).json(&json!({ "order": 42 })).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn test_manual_print_partial_order_is_bad_request() {
    let (addr, _relay) = start_relay(RelaySettings {
        admin_token: Some("admin-token".into()),
        ..settings()
    })
    .await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/print");

    let resp = client
        .post(&url)
        .bearer_auth("admin-token")
        .json(&json!({ "order": { "orderIdString": "ord_partial" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid order data"));

    let resp = client
        .post(&url)
        .bearer_auth("admin-token")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}
