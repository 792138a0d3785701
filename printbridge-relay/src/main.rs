use std::sync::Arc;

use clap::Parser;
use printbridge_common::PRINTER_WS_PATH;
use printbridge_relay::{serve, AppState, BridgeRegistry, Cli, RelayConfig, RelayHandle};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("printbridge_relay=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = RelayConfig::load(&cli.config)?;
    info!("relay: printbridge-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("relay: config from {:?}", cli.config);

    if cfg.relay.secret.is_empty() {
        warn!("relay: PRINTER_BRIDGE_SECRET is not set, every bridge connection will be rejected");
    }
    if cfg.relay.admin_token.is_none() {
        warn!("relay: PRINT_ADMIN_TOKEN is not set, POST /api/print is unauthenticated");
    }

    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("relay: listening on http://{addr}, printer endpoint {PRINTER_WS_PATH}");

    let relay = RelayHandle::new(Arc::new(BridgeRegistry::new()));
    serve(listener, AppState::new(relay, &cfg.relay), shutdown_signal()).await?;

    info!("relay: stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("relay: failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("relay: failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("relay: received Ctrl+C"),
        _ = terminate => info!("relay: received terminate signal"),
    }
}
