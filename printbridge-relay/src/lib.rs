//! Cloud side of the printer bridge.
//!
//! Accepts one authenticated WebSocket from the bridge running on the
//! restaurant PC and hands print jobs to it:
//!
//! - `GET /printer-ws?secret=…` upgrade endpoint ([`handshake`])
//! - [`RelayHandle`] for order handling code ([`dispatch`])
//! - `GET|POST /api/print` and `/health` ([`api`])

pub mod api;
pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod registry;
pub mod server;

pub use config::{Cli, RelayConfig, RelaySettings};
pub use dispatch::{DispatchError, RelayHandle};
pub use handshake::HandshakeRejection;
pub use registry::{BridgeConnection, BridgeRegistry};
pub use server::{create_router, serve, AppState};
