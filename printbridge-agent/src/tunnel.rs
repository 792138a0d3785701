//! Connection to the cloud relay.
//!
//! [`BridgeClient`] owns the socket, the heartbeat timer and the printer. A
//! single task drives every state change, so heartbeats, inbound frames and
//! reconnects never race.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use futures_util::{Sink, SinkExt, StreamExt};
use printbridge_common::{BridgeMessage, PrintStatusReport};
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, error, info, warn};

use crate::config::AgentSettings;
use crate::receipt::JobPrinter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    /// A live session just ended; the next step is always one reconnect.
    Closed,
}

/// How a session ended.
enum SessionEnd {
    Closed(String),
    Shutdown,
}

pub struct BridgeClient {
    settings: AgentSettings,
    printer: Arc<dyn JobPrinter>,
    state_tx: watch::Sender<BridgeState>,
}

impl BridgeClient {
    pub fn new(settings: AgentSettings, printer: Arc<dyn JobPrinter>) -> Self {
        let (state_tx, _) = watch::channel(BridgeState::Disconnected);
        Self {
            settings,
            printer,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> BridgeState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: BridgeState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!("agent: {prev:?} -> {next:?}");
        }
    }

    /// Connect, serve, and reconnect after a fixed delay, until `shutdown`
    /// resolves.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let delay = self.settings.reconnect_delay();
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                info!("agent: reconnecting in {}ms", delay.as_millis());
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = &mut shutdown => break,
                }
            }
            first_attempt = false;

            self.transition(BridgeState::Connecting);
            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed(reason)) => {
                    self.transition(BridgeState::Closed);
                    warn!("agent: disconnected from relay ({reason})");
                }
                Err(e) => {
                    error!("agent: connection failed: {e:#}");
                }
            }
            self.transition(BridgeState::Disconnected);
        }

        self.transition(BridgeState::Disconnected);
        info!("agent: stopped");
        Ok(())
    }

    /// One connection attempt and, if it opens, the connected session.
    async fn session<S>(&self, shutdown: &mut S) -> anyhow::Result<SessionEnd>
    where
        S: Future<Output = ()> + Unpin,
    {
        let url = self.settings.endpoint()?;
        info!("agent: connecting to {}", self.settings.display_endpoint()?);

        let connector = if url.scheme() == "wss" {
            Some(tls_connector()?)
        } else {
            None
        };
        let connect = connect_async_tls_with_config(url.as_str(), None, true, connector);

        let (ws, _) = tokio::select! {
            r = timeout(self.settings.connect_timeout(), connect) => {
                r.map_err(|_| anyhow!("timed out after {:?}", self.settings.connect_timeout()))?
                    .context("WebSocket handshake")?
            }
            _ = &mut *shutdown => return Ok(SessionEnd::Shutdown),
        };
        let (mut sink, mut stream) = ws.split();

        self.transition(BridgeState::Connected);
        info!("agent: connected to relay, waiting for print jobs");

        let period = self.settings.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_relay_msg(text.as_str()).await {
                                if let Err(e) = send_message(&mut sink, &reply).await {
                                    break SessionEnd::Closed(format!("failed to send reply: {e}"));
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => break SessionEnd::Closed(describe_close(frame)),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break SessionEnd::Closed(format!("WebSocket error: {e}")),
                        None => break SessionEnd::Closed("connection dropped".into()),
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = send_message(&mut sink, &BridgeMessage::Ping).await {
                        break SessionEnd::Closed(format!("heartbeat failed: {e}"));
                    }
                    debug!("agent: sent heartbeat ping");
                }
                _ = &mut *shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break SessionEnd::Shutdown;
                }
            }
        };
        Ok(end)
    }

    /// Handle one frame from the relay, returning the reply to send, if any.
    async fn handle_relay_msg(&self, text: &str) -> Option<BridgeMessage> {
        match BridgeMessage::decode(text) {
            Ok(BridgeMessage::OrderPrint { order }) => {
                info!("agent: new print job received: Order #{}", order.display_id());
                let report = match self.printer.print(&order).await {
                    Ok(()) => PrintStatusReport::success(&order.order_id_string),
                    Err(e) => {
                        error!("agent: print failed for Order #{}: {e}", order.display_id());
                        PrintStatusReport::failed(&order.order_id_string, e.to_string())
                    }
                };
                Some(BridgeMessage::PrintStatus(report))
            }
            Ok(BridgeMessage::Pong) => None,
            Ok(other) => {
                debug!("agent: ignoring unexpected frame from relay: {other:?}");
                None
            }
            Err(e) => {
                warn!("agent: failed to process message: {e}");
                None
            }
        }
    }
}

async fn send_message<S>(sink: &mut S, msg: &BridgeMessage) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(msg.encode()?.into())).await?;
    Ok(())
}

fn describe_close(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(f) if f.reason.is_empty() => format!("code {}", u16::from(f.code)),
        Some(f) => format!("code {}: {}", u16::from(f.code), f.reason.as_str()),
        None => "closed by relay".into(),
    }
}

fn tls_connector() -> anyhow::Result<Connector> {
    let mut roots = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for e in &certs.errors {
        warn!("agent: skipping unreadable system certificate: {e}");
    }
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            debug!("agent: skipping invalid system certificate: {e}");
        }
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("TLS config")?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}
