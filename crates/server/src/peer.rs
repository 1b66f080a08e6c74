use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use wall::net::{PeerRoute, SocketHandle, SocketId};

/// Relays peer signaling between display clients. Payloads travel untouched;
/// only `to` is read.
#[derive(Debug, Default)]
pub struct PeerRelay {
    peers: HashMap<String, SocketHandle>,
}

impl PeerRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: String, socket: SocketHandle) -> Option<SocketHandle> {
        log::debug!("Peer {} registered on {}", id, socket.id());
        self.peers.insert(id, socket)
    }

    pub fn forward(&self, kind: &str, payload: &Value) -> bool {
        let route: PeerRoute = match PeerRoute::deserialize(payload) {
            Ok(route) => route,
            Err(e) => {
                log::warn!("Dropping {} without a route: {}", kind, e);
                return false;
            }
        };
        match self.peers.get(&route.to) {
            Some(socket) => socket.send(kind, payload.clone()),
            None => {
                log::error!("Dropping {} for unknown peer {}", kind, route.to);
                false
            }
        }
    }

    /// Drops every peer id that was registered on a closed connection.
    pub fn forget(&mut self, socket: SocketId) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, s| s.id() != socket);
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }
}
