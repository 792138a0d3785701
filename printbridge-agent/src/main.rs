use std::sync::Arc;

use clap::Parser;
use printbridge_agent::{check_printer, open_printer, AgentConfig, BridgeClient, Cli, ReceiptRenderer};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("printbridge_agent=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = AgentConfig::load(&cli.config)?;

    info!("agent: printbridge-agent v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "agent: relay={}, printer={}, reconnect={}ms, heartbeat={}ms",
        cfg.agent.display_endpoint()?,
        cfg.printer.interface,
        cfg.agent.reconnect_delay_ms,
        cfg.agent.heartbeat_interval_ms,
    );

    let device = open_printer(&cfg.printer.interface, cfg.printer.timeout())?;
    check_printer(device.as_ref()).await;

    let renderer = Arc::new(ReceiptRenderer::new(cfg.receipt.clone(), device));
    BridgeClient::new(cfg.agent.clone(), renderer)
        .run(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("agent: failed to listen for Ctrl+C: {e}");
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
                warn!("agent: failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("agent: received Ctrl+C"),
        _ = terminate => info!("agent: received terminate signal"),
    }
}
