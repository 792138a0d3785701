use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use printbridge_common::PRINTER_WS_PATH;
use tokio::net::TcpListener;

use crate::api;
use crate::config::RelaySettings;
use crate::dispatch::RelayHandle;
use crate::handshake::printer_ws_handler;

/// Shared application state.
pub struct AppState {
    pub relay: RelayHandle,
    pub secret: String,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(relay: RelayHandle, settings: &RelaySettings) -> Self {
        Self {
            relay,
            secret: settings.secret.clone(),
            admin_token: settings.admin_token.clone(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(PRINTER_WS_PATH, get(printer_ws_handler))
        .route("/api/print", get(api::print_status).post(api::print_order))
        .route("/health", get(api::health))
        .with_state(state)
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(Arc::new(state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
