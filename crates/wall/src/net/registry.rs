use std::collections::HashMap;

use serde_json::Value;

use super::protocol::{ClientStart, kind};
use super::socket::{SocketHandle, SocketId};
use crate::geometry::{GeometryError, Point, Rect};

pub const DEFAULT_MAX_CLIENTS: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("client-start carried no rect")]
    MissingRect,
    #[error("bad client rect: {0}")]
    BadRect(#[from] GeometryError),
    #[error("wall full ({0} clients)")]
    Full(usize),
}

/// A display client that has told us which part of the wall it shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub id: SocketId,
    pub rect: Rect,
    pub offset: Point,
    pub socket: SocketHandle,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    NewClient(ClientRecord),
    LostClient(ClientRecord),
}

impl RegistryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewClient(_) => kind::NEW_CLIENT,
            Self::LostClient(_) => kind::LOST_CLIENT,
        }
    }

    pub fn record(&self) -> &ClientRecord {
        match self {
            Self::NewClient(record) | Self::LostClient(record) => record,
        }
    }
}

#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<SocketId, ClientRecord>,
    max_clients: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLIENTS)
    }
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Validates a client-start and records the client. An invalid request
    /// closes the socket; the caller decides how to log it.
    pub fn register(
        &mut self,
        start: &ClientStart,
        socket: SocketHandle,
    ) -> Result<ClientRecord, RegistrationError> {
        let result = self.validate(start, &socket);
        let rect = match result {
            Ok(rect) => rect,
            Err(e) => {
                socket.close();
                return Err(e);
            }
        };

        let record = ClientRecord {
            id: socket.id(),
            rect,
            offset: start.offset,
            socket,
        };
        self.clients.insert(record.id, record.clone());
        Ok(record)
    }

    fn validate(&self, start: &ClientStart, socket: &SocketHandle) -> Result<Rect, RegistrationError> {
        let raw = start.rect.as_deref().ok_or(RegistrationError::MissingRect)?;
        let rect = Rect::deserialize(raw)?;
        let replacing = self.clients.contains_key(&socket.id());
        if !replacing && self.clients.len() >= self.max_clients {
            return Err(RegistrationError::Full(self.max_clients));
        }
        Ok(rect)
    }

    pub fn unregister(&mut self, id: SocketId) -> Option<ClientRecord> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: SocketId) -> Option<&ClientRecord> {
        self.clients.get(&id)
    }

    /// Registered clients, oldest connection first.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self.clients.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn clients_intersecting(&self, rect: &Rect) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self
            .clients
            .values()
            .filter(|r| r.rect.intersects(rect))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn find_by_rect(&self, rect: &Rect) -> Option<&ClientRecord> {
        self.clients.values().find(|r| r.rect == *rect)
    }

    pub fn broadcast(&self, kind: &str, payload: &Value) -> usize {
        self.clients
            .values()
            .filter(|r| r.socket.send(kind, payload.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::Outbound;

    fn start(rect: Option<&str>) -> ClientStart {
        ClientStart {
            rect: rect.map(str::to_string),
            offset: Point::new(0.0, 0.0),
        }
    }

    #[test]
    fn register_and_unregister() {
        let mut registry = ClientRegistry::default();
        let (socket, _rx) = SocketHandle::channel();
        let id = socket.id();

        let record = registry.register(&start(Some("0,0,960,540")), socket).unwrap();
        assert_eq!(record.rect, Rect::new(0.0, 0.0, 960.0, 540.0));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn bad_rect_closes_socket() {
        let mut registry = ClientRegistry::default();

        for raw in [None, Some("0,0,10"), Some("a,b,c,d"), Some("0,0,0,10")] {
            let (socket, mut rx) = SocketHandle::channel();
            assert!(registry.register(&start(raw), socket).is_err());
            assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn full_registry_rejects() {
        let mut registry = ClientRegistry::new(1);
        let (a, _ra) = SocketHandle::channel();
        let (b, _rb) = SocketHandle::channel();

        registry.register(&start(Some("0,0,10,10")), a.clone()).unwrap();
        assert!(matches!(
            registry.register(&start(Some("10,0,10,10")), b),
            Err(RegistrationError::Full(1))
        ));
        // re-registering the same socket is an update, not a new client
        assert!(registry.register(&start(Some("5,0,10,10")), a).is_ok());
    }

    #[test]
    fn intersection_query() {
        let mut registry = ClientRegistry::default();
        let mut receivers = Vec::new();
        for rect in ["0,0,10,10", "10,0,10,10", "20,0,10,10"] {
            let (socket, rx) = SocketHandle::channel();
            receivers.push(rx);
            registry.register(&start(Some(rect)), socket).unwrap();
        }

        let hits = registry.clients_intersecting(&Rect::new(5.0, 0.0, 10.0, 10.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rect.x, 0.0);
        assert_eq!(hits[1].rect.x, 10.0);
    }
}
