use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::ServerMessage;

/// Outgoing channels of every live connection.
#[derive(Clone, Default)]
pub struct Dispatcher {
    connections: Arc<DashMap<String, mpsc::UnboundedSender<String>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id plus the receiving half the
    /// socket task drains.
    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = crate::ids::connection_id();
        self.connections.insert(connection_id.clone(), tx);
        (connection_id, rx)
    }

    pub fn remove(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Best-effort delivery. Returns false when the connection is gone.
    pub fn send(&self, connection_id: &str, msg: &ServerMessage) -> bool {
        let Some(tx) = self.connections.get(connection_id) else {
            tracing::debug!(%connection_id, "skipping send to closed connection");
            return false;
        };
        tx.send(msg.to_json()).is_ok()
    }
}
