//! Printer bridge upgrade endpoint and the per-connection relay loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use printbridge_common::{
    secrets_match, BridgeMessage, PrintOutcome, PrintStatusReport, SECRET_HEADER,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::BridgeConnection;
use crate::server::AppState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeRejection {
    #[error("relay has no bridge secret configured")]
    NotConfigured,
    #[error("secret missing")]
    Missing,
    #[error("secret malformed")]
    Malformed,
    #[error("secret mismatch")]
    Mismatch,
}

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    secret: Option<String>,
}

/// Pick the presented secret: query parameter first, then the header.
fn presented_secret(
    params: Result<Query<HandshakeParams>, QueryRejection>,
    headers: &HeaderMap,
) -> Result<Option<String>, HandshakeRejection> {
    let from_query = params
        .map_err(|_| HandshakeRejection::Malformed)?
        .0
        .secret;
    if from_query.is_some() {
        return Ok(from_query);
    }
    headers
        .get(SECRET_HEADER)
        .map(|v| {
            v.to_str()
                .map(str::to_owned)
                .map_err(|_| HandshakeRejection::Malformed)
        })
        .transpose()
}

pub fn authorize(expected: &str, presented: Option<&str>) -> Result<(), HandshakeRejection> {
    if expected.is_empty() {
        return Err(HandshakeRejection::NotConfigured);
    }
    let presented = presented
        .filter(|s| !s.is_empty())
        .ok_or(HandshakeRejection::Missing)?;
    if secrets_match(presented, expected) {
        Ok(())
    } else {
        Err(HandshakeRejection::Mismatch)
    }
}

/// `GET /printer-ws`: authenticate, then upgrade and register the bridge.
///
/// Authentication runs before the upgrade is accepted, so a rejected caller
/// only ever sees a plain `401` and the socket is never registered.
pub async fn printer_ws_handler(
    params: Result<Query<HandshakeParams>, QueryRejection>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let verdict = presented_secret(params, &headers)
        .and_then(|secret| authorize(&state.secret, secret.as_deref()));
    if let Err(rejection) = verdict {
        warn!("relay: unauthorized printer bridge attempt from {peer} rejected ({rejection})");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_bridge_socket(socket, state, peer)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_bridge_socket(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    let (mut sink, mut stream) = socket.split();

    // Only the registry holds the sender, so `rx` closes when this connection
    // is replaced.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = BridgeConnection::new(tx);
    let conn_id = conn.id();

    let registry = state.relay.registry();
    if let Some(previous) = registry.register(conn) {
        info!("relay: bridge {} replaced by new connection {conn_id}", previous.id());
    }
    info!("relay: printer bridge connected from {peer} ({conn_id})");

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_bridge_msg(text.as_str()) {
                            let encoded = match reply.encode() {
                                Ok(s) => s,
                                Err(e) => {
                                    warn!("relay: failed to encode reply: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(encoded.into())).await {
                                warn!("relay: printer WS error: {e}");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => info!("relay: bridge closed the socket (code {}: {})", f.code, f.reason.as_str()),
                            None => info!("relay: bridge closed the socket"),
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("relay: printer WS error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            warn!("relay: failed to write to printer bridge: {e}");
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    drop(rx);
    registry.clear(conn_id);
    warn!("relay: printer bridge disconnected from {peer} ({conn_id})");
}

/// Handle one text frame from the bridge, returning the reply to send, if any.
fn handle_bridge_msg(text: &str) -> Option<BridgeMessage> {
    match BridgeMessage::decode(text) {
        Ok(BridgeMessage::Ping) => Some(BridgeMessage::Pong),
        Ok(BridgeMessage::PrintStatus(report)) => {
            log_print_status(&report);
            None
        }
        Ok(other) => {
            debug!("relay: ignoring unexpected frame from bridge: {other:?}");
            None
        }
        Err(e) => {
            debug!("relay: unparseable frame from bridge ({e}): {text}");
            None
        }
    }
}

fn log_print_status(report: &PrintStatusReport) {
    match report.status {
        PrintOutcome::Success => {
            info!("relay: print status [{}]: SUCCESS", report.order_id);
        }
        PrintOutcome::Failed => {
            warn!(
                "relay: print status [{}]: FAILED {}",
                report.order_id,
                report.error.as_deref().unwrap_or("")
            );
        }
    }
}
