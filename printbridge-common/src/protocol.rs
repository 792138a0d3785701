use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Path the bridge upgrades on.
pub const PRINTER_WS_PATH: &str = "/printer-ws";
/// Query parameter carrying the shared secret.
pub const SECRET_QUERY_PARAM: &str = "secret";
/// Header fallback for the shared secret.
pub const SECRET_HEADER: &str = "x-printer-secret";

/// Number of trailing characters of the order id shown on receipts and in logs.
const DISPLAY_ID_LEN: usize = 8;

/// Relay ↔ bridge messages, JSON text frames tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    /// Relay → bridge: print this order
    #[serde(rename = "ORDER_PRINT")]
    OrderPrint { order: PrintJob },
    /// Bridge → relay: outcome of a print attempt
    #[serde(rename = "PRINT_STATUS")]
    PrintStatus(PrintStatusReport),
    /// Heartbeat, bridge → relay
    #[serde(rename = "PING")]
    Ping,
    /// Heartbeat reply, relay → bridge
    #[serde(rename = "PONG")]
    Pong,
}

impl BridgeMessage {
    pub fn order_print(job: PrintJob) -> Self {
        Self::OrderPrint { order: job }
    }

    pub fn encode(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Snapshot of an order as sent for printing. Field names follow the web
/// application's JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    #[serde(default)]
    pub id: String,
    pub order_id_string: String,
    pub customer_name: String,
    pub customer_mobile: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub table_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub pickup_time: Option<String>,
    pub total_amount: f64,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
}

impl PrintJob {
    /// Short, upper-cased order reference: the last characters of the full id.
    pub fn display_id(&self) -> String {
        let chars: Vec<char> = self.order_id_string.chars().collect();
        let start = chars.len().saturating_sub(DISPLAY_ID_LEN);
        chars[start..].iter().collect::<String>().to_uppercase()
    }

    /// Location lines that apply to this order's service type, as
    /// `(label, value)` pairs. Known types yield at most one line; an
    /// unrecognised type yields every location field that is present.
    pub fn location_lines(&self) -> Vec<(&'static str, &str)> {
        let table = non_empty(&self.table_number).map(|v| ("Table", v));
        let address = non_empty(&self.address).map(|v| ("Addr", v));
        let pickup = non_empty(&self.pickup_time).map(|v| ("Pickup", v));

        match &self.service_type {
            ServiceType::DineIn => table.into_iter().collect(),
            ServiceType::Delivery => address.into_iter().collect(),
            ServiceType::Takeaway => pickup.into_iter().collect(),
            ServiceType::Other(_) => [table, address, pickup].into_iter().flatten().collect(),
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Order service type. Values the web app adds later are carried verbatim,
/// so a job is forwarded and printed exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    DineIn,
    Takeaway,
    Delivery,
    Other(String),
}

impl ServiceType {
    pub fn label(&self) -> &str {
        match self {
            Self::DineIn => "Dine In",
            Self::Takeaway => "Takeaway",
            Self::Delivery => "Delivery",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for ServiceType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "DINE_IN" => Self::DineIn,
            "TAKEAWAY" => Self::Takeaway,
            "DELIVERY" => Self::Delivery,
            _ => Self::Other(raw),
        }
    }
}

impl From<ServiceType> for String {
    fn from(kind: ServiceType) -> Self {
        match kind {
            ServiceType::DineIn => "DINE_IN".into(),
            ServiceType::Takeaway => "TAKEAWAY".into(),
            ServiceType::Delivery => "DELIVERY".into(),
            ServiceType::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl LineItem {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintStatusReport {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: PrintOutcome,
    #[serde(default)]
    pub error: Option<String>,
}

impl PrintStatusReport {
    pub fn success(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: PrintOutcome::Success,
            error: None,
        }
    }

    pub fn failed(order_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: PrintOutcome::Failed,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintOutcome {
    Success,
    Failed,
}
