//! Restaurant side of the printer bridge.
//!
//! Keeps one outbound WebSocket open to the relay, answers print jobs with a
//! status report, and renders receipts on the local thermal printer.

pub mod config;
pub mod printer;
pub mod receipt;
pub mod tunnel;

pub use config::{AgentConfig, AgentSettings, Cli, PrinterSettings};
pub use printer::{check_printer, open_printer, PrintError, PrinterDevice};
pub use receipt::{compose, JobPrinter, ReceiptLayout, ReceiptRenderer};
pub use tunnel::{BridgeClient, BridgeState};
