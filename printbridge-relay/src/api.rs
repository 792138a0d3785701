//! Admin-facing HTTP endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use printbridge_common::{secrets_match, PrintJob};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PrinterStatus {
    pub connected: bool,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PrintRequest {
    #[serde(default)]
    order: Option<PrintJob>,
}

pub async fn health() -> &'static str {
    "ok"
}

/// `GET /api/print`
pub async fn print_status(State(state): State<Arc<AppState>>) -> Json<PrinterStatus> {
    let connected = state.relay.is_printer_connected();
    Json(PrinterStatus {
        connected,
        status: if connected {
            "Printer bridge connected"
        } else {
            "Printer bridge NOT connected"
        },
    })
}

/// `POST /api/print`: manual (re)print of an order from the admin dashboard.
///
/// The body is decoded only after the caller is authorised.
pub async fn print_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_admin(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }

    let req: PrintRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            warn!("relay: rejected malformed print request: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid order data: {e}") })),
            )
                .into_response();
        }
    };

    let Some(order) = req.order else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Order data required" })),
        )
            .into_response();
    };

    if !state.relay.send_to_printer(&order) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "Printer bridge not connected. Is printbridge-agent running on the restaurant PC?",
            })),
        )
            .into_response();
    }

    Json(json!({ "success": true, "message": "Print job sent to bridge" })).into_response()
}

fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token.as_deref() else {
        return true;
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let ok = secrets_match(presented, expected);
    if !ok {
        warn!("relay: rejected unauthorized print request");
    }
    ok
}
