use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use super::mux::{EventMux, Multiplexer};
use super::protocol::ClientStart;
use super::registry::{ClientRecord, ClientRegistry, RegistrationError, RegistryEvent};
use super::socket::{SocketHandle, SocketId};
use crate::geometry::Rect;

/// Fan-out to every registered display client.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, kind: &str, payload: Value) -> usize;
}

pub type RegistryListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Server side of the wall network: the client registry, the shared handler
/// table for inbound messages, and registry event listeners.
pub struct ServerNetwork {
    registry: Mutex<ClientRegistry>,
    events: EventMux,
    listeners: Mutex<Vec<(ListenerId, RegistryListener)>>,
    next_listener: AtomicU64,
}

impl Default for ServerNetwork {
    fn default() -> Self {
        Self::new(ClientRegistry::default())
    }
}

impl ServerNetwork {
    pub fn new(registry: ClientRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
            events: EventMux::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn register(
        &self,
        start: &ClientStart,
        socket: SocketHandle,
    ) -> Result<ClientRecord, RegistrationError> {
        let record = self.registry.lock().register(start, socket)?;
        self.notify(&RegistryEvent::NewClient(record.clone()));
        Ok(record)
    }

    pub fn unregister(&self, id: SocketId) -> Option<ClientRecord> {
        let record = self.registry.lock().unregister(id)?;
        self.notify(&RegistryEvent::LostClient(record.clone()));
        Some(record)
    }

    pub fn clients(&self) -> Vec<ClientRecord> {
        self.registry.lock().snapshot()
    }

    pub fn client(&self, id: SocketId) -> Option<ClientRecord> {
        self.registry.lock().get(id).cloned()
    }

    pub fn clients_intersecting(&self, rect: &Rect) -> Vec<ClientRecord> {
        self.registry.lock().clients_intersecting(rect)
    }

    pub fn find_by_rect(&self, rect: &Rect) -> Option<ClientRecord> {
        self.registry.lock().find_by_rect(rect).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn events(&self) -> &EventMux {
        &self.events
    }

    pub fn dispatch(&self, kind: &str, payload: &Value, socket: &SocketHandle) -> usize {
        self.events.dispatch(kind, payload, socket)
    }

    pub fn subscribe(&self, listener: RegistryListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, event: &RegistryEvent) {
        let listeners: Vec<RegistryListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Broadcast for ServerNetwork {
    fn broadcast(&self, kind: &str, payload: Value) -> usize {
        self.registry.lock().broadcast(kind, &payload)
    }
}

impl Multiplexer for ServerNetwork {
    fn events(&self) -> &EventMux {
        &self.events
    }

    fn send(&self, kind: &str, payload: Value) {
        Broadcast::broadcast(self, kind, payload);
    }
}

/// Client side of the wall network: one connection to the server that may be
/// swapped on reconnect while handlers stay registered.
#[derive(Default)]
pub struct ClientNetwork {
    events: EventMux,
    server: Mutex<Option<SocketHandle>>,
}

impl ClientNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, socket: SocketHandle) {
        *self.server.lock() = Some(socket);
    }

    pub fn detach(&self) -> Option<SocketHandle> {
        self.server.lock().take()
    }

    pub fn is_connected(&self) -> bool {
        self.server.lock().as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn send_to_server(&self, kind: &str, payload: Value) -> bool {
        match self.server.lock().as_ref() {
            Some(socket) => socket.send(kind, payload),
            None => {
                log::debug!("Dropping {} while disconnected", kind);
                false
            }
        }
    }

    pub fn dispatch(&self, kind: &str, payload: &Value, socket: &SocketHandle) -> usize {
        self.events.dispatch(kind, payload, socket)
    }
}

impl Multiplexer for ClientNetwork {
    fn events(&self) -> &EventMux {
        &self.events
    }

    fn send(&self, kind: &str, payload: Value) {
        self.send_to_server(kind, payload);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::net::socket::Outbound;

    fn start(rect: &str) -> ClientStart {
        ClientStart {
            rect: Some(rect.to_string()),
            offset: Default::default(),
        }
    }

    #[test]
    fn listeners_see_join_and_leave() {
        let network = ServerNetwork::default();
        let joined = Arc::new(AtomicUsize::new(0));
        let left = Arc::new(AtomicUsize::new(0));
        let (j, l) = (Arc::clone(&joined), Arc::clone(&left));
        let listener = network.subscribe(Arc::new(move |event| match event {
            RegistryEvent::NewClient(_) => {
                j.fetch_add(1, Ordering::SeqCst);
            }
            RegistryEvent::LostClient(_) => {
                l.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let (socket, _rx) = SocketHandle::channel();
        let id = socket.id();
        network.register(&start("0,0,10,10"), socket).unwrap();
        network.unregister(id);
        network.unregister(id);

        assert_eq!(joined.load(Ordering::SeqCst), 1);
        assert_eq!(left.load(Ordering::SeqCst), 1);

        assert!(network.unsubscribe(listener));
        assert!(!network.unsubscribe(listener));
    }

    #[test]
    fn failed_registration_is_silent() {
        let network = ServerNetwork::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        network.subscribe(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let (socket, _rx) = SocketHandle::channel();
        assert!(network.register(&start("nope"), socket).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn broadcast_reaches_registered_clients_only() {
        let network = ServerNetwork::default();
        let (registered, mut registered_rx) = SocketHandle::channel();
        let (_stranger, mut stranger_rx) = SocketHandle::channel();
        network.register(&start("0,0,10,10"), registered).unwrap();

        assert_eq!(network.broadcast("time", json!({ "time": 1.0 })), 1);
        assert!(matches!(registered_rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(stranger_rx.try_recv().is_err());
    }

    #[test]
    fn client_network_drops_while_detached() {
        let network = ClientNetwork::new();
        assert!(!network.send_to_server("record-error", json!({})));

        let (socket, mut rx) = SocketHandle::channel();
        network.attach(socket);
        assert!(network.send_to_server("record-error", json!({})));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
    }
}
