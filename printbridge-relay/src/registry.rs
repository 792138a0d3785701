use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dispatch::DispatchError;

pub type Tx = mpsc::UnboundedSender<String>;

/// The live socket to a bridge client, seen from the relay.
///
/// The relay task owning the socket holds the receiving end of `tx`; once that
/// task stops, the connection reports itself closed.
#[derive(Debug)]
pub struct BridgeConnection {
    id: Uuid,
    tx: Tx,
}

impl BridgeConnection {
    pub fn new(tx: Tx) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Holds at most one current bridge connection. A new registration replaces
/// the previous one; clearing only removes the connection it names, so a late
/// close from a replaced socket cannot unregister its successor.
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    current: RwLock<Option<BridgeConnection>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` as the current connection, returning the one it replaced.
    pub fn register(&self, conn: BridgeConnection) -> Option<BridgeConnection> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.replace(conn)
    }

    /// Remove the current connection if it is still `id`.
    pub fn clear(&self, id: Uuid) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(BridgeConnection::is_open)
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(BridgeConnection::id)
    }

    /// Queue an encoded frame for the current connection's writer.
    pub fn send(&self, frame: String) -> Result<(), DispatchError> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        let conn = current.as_ref().ok_or(DispatchError::NotConnected)?;
        conn.tx.send(frame).map_err(|_| DispatchError::ChannelClosed)
    }
}
