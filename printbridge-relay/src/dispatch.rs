use std::sync::Arc;

use printbridge_common::{BridgeError, BridgeMessage, PrintJob};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::registry::BridgeRegistry;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no printer bridge connected")]
    NotConnected,
    #[error("failed to encode print job: {0}")]
    Encode(#[from] BridgeError),
    #[error("printer bridge connection closed")]
    ChannelClosed,
}

/// Handle used by order handling code to reach the printer bridge.
#[derive(Clone, Default)]
pub struct RelayHandle {
    registry: Arc<BridgeRegistry>,
}

impl RelayHandle {
    pub fn new(registry: Arc<BridgeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        &self.registry
    }

    pub fn is_printer_connected(&self) -> bool {
        self.registry.is_connected()
    }

    /// Queue an `ORDER_PRINT` for the connected bridge. Does not wait for the
    /// bridge and never retries.
    pub fn try_send_to_printer(&self, job: &PrintJob) -> Result<(), DispatchError> {
        if !self.registry.is_connected() {
            return Err(DispatchError::NotConnected);
        }
        let frame = BridgeMessage::order_print(job.clone()).encode()?;
        self.registry.send(frame)
    }

    /// Best-effort dispatch: `true` if the job was handed to the bridge socket.
    pub fn send_to_printer(&self, job: &PrintJob) -> bool {
        match self.try_send_to_printer(job) {
            Ok(()) => {
                info!("relay: print job sent: Order #{}", job.display_id());
                true
            }
            Err(DispatchError::NotConnected) => {
                warn!("relay: send_to_printer: no printer bridge connected");
                false
            }
            Err(e) => {
                error!(
                    "relay: failed to send print job for Order #{}: {e}",
                    job.display_id()
                );
                false
            }
        }
    }

    /// Fire-and-forget dispatch for request handlers: the job is sent from a
    /// detached task and its outcome is only logged.
    pub fn dispatch_in_background(&self, job: PrintJob) {
        let relay = self.clone();
        tokio::spawn(async move {
            if !relay.send_to_printer(&job) {
                warn!(
                    "relay: Order #{} was not sent to the printer",
                    job.display_id()
                );
            }
        });
    }
}
