use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::endpoint::ServerNetwork;
use super::mux::Multiplexer;
use super::protocol::scoped_kind;
use super::registry::ClientRecord;
use super::socket::{SocketHandle, SocketId};

/// The peer a scoped handler is talking to. Replies stay inside the module's
/// channel.
#[derive(Debug, Clone)]
pub struct ScopedSocket {
    socket: SocketHandle,
    module_id: Arc<str>,
}

impl ScopedSocket {
    pub fn id(&self) -> SocketId {
        self.socket.id()
    }

    pub fn send(&self, kind: &str, payload: Value) -> bool {
        self.socket.send(&scoped_kind(&self.module_id, kind), payload)
    }

    pub fn raw(&self) -> &SocketHandle {
        &self.socket
    }
}

#[derive(Debug, Default)]
struct OverlayState {
    closed: bool,
    kinds: BTreeSet<String>,
}

/// A module's private view of a shared connection. Every message type is
/// prefixed with the module instance id, and closing the overlay removes every
/// handler it registered.
pub struct ChannelOverlay<N: Multiplexer> {
    network: Arc<N>,
    module_id: Arc<str>,
    state: Mutex<OverlayState>,
}

impl<N: Multiplexer> ChannelOverlay<N> {
    pub fn new(network: Arc<N>, module_id: &str) -> Self {
        Self {
            network,
            module_id: Arc::from(module_id),
            state: Mutex::new(OverlayState::default()),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn on<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&Value, &ScopedSocket) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            log::warn!("{}: ignoring handler for {} on closed channel", self.module_id, kind);
            return;
        }

        let scoped = scoped_kind(&self.module_id, kind);
        let module_id = Arc::clone(&self.module_id);
        self.network.events().on(
            scoped.clone(),
            Arc::new(move |payload, socket| {
                let scoped = ScopedSocket {
                    socket: socket.clone(),
                    module_id: Arc::clone(&module_id),
                };
                handler(payload, &scoped);
            }),
        );
        state.kinds.insert(scoped);
    }

    pub fn send(&self, kind: &str, payload: Value) {
        if self.state.lock().closed {
            log::debug!("{}: dropping {} on closed channel", self.module_id, kind);
            return;
        }
        self.network.send(&scoped_kind(&self.module_id, kind), payload);
    }

    /// Removes every handler this overlay registered. Returns how many went.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        state.closed = true;
        let events = self.network.events();
        std::mem::take(&mut state.kinds)
            .iter()
            .map(|kind| events.remove_all(kind))
            .sum()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn registered_kinds(&self) -> usize {
        self.state.lock().kinds.len()
    }
}

impl ChannelOverlay<ServerNetwork> {
    pub fn clients(&self) -> Vec<ClientRecord> {
        self.network.clients()
    }
}

/// Open overlays keyed by module instance id.
pub struct ChannelOverlays<N: Multiplexer> {
    network: Arc<N>,
    open: Mutex<HashMap<String, Arc<ChannelOverlay<N>>>>,
}

impl<N: Multiplexer> ChannelOverlays<N> {
    pub fn new(network: Arc<N>) -> Self {
        Self {
            network,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn open(&self, module_id: &str) -> Arc<ChannelOverlay<N>> {
        let mut open = self.open.lock();
        let overlay = open.entry(module_id.to_string()).or_insert_with(|| {
            Arc::new(ChannelOverlay::new(Arc::clone(&self.network), module_id))
        });
        Arc::clone(overlay)
    }

    pub fn close(&self, module_id: &str) -> bool {
        let removed = self.open.lock().remove(module_id);
        match removed {
            Some(overlay) => {
                let handlers = overlay.close();
                log::debug!("{}: channel closed, {} handlers removed", module_id, handlers);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, module_id: &str) -> bool {
        self.open.lock().contains_key(module_id)
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::net::endpoint::ClientNetwork;
    use crate::net::socket::Outbound;

    #[test]
    fn sends_are_prefixed() {
        let network = Arc::new(ClientNetwork::new());
        let (socket, mut rx) = SocketHandle::channel();
        network.attach(socket);

        let overlay = ChannelOverlay::new(Arc::clone(&network), "4-2000");
        overlay.send("hello", json!(1));

        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => assert_eq!(frame.kind, "4-2000:hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn close_removes_handlers_and_is_idempotent() {
        let network = Arc::new(ClientNetwork::new());
        let overlays = ChannelOverlays::new(Arc::clone(&network));
        let overlay = overlays.open("1-100");
        let hits = Arc::new(AtomicUsize::new(0));

        for kind in ["a", "b"] {
            let hits = Arc::clone(&hits);
            overlay.on(kind, move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(network.events().total_handlers(), 2);

        assert!(overlays.close("1-100"));
        assert!(!overlays.close("1-100"));
        assert_eq!(network.events().total_handlers(), 0);

        let (socket, _rx) = SocketHandle::channel();
        network.dispatch("1-100:a", &json!(null), &socket);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        overlay.on("late", |_, _| {});
        assert_eq!(network.events().total_handlers(), 0);
    }

    #[test]
    fn replies_stay_in_channel() {
        let network = Arc::new(ClientNetwork::new());
        let overlay = ChannelOverlay::new(Arc::clone(&network), "m");
        overlay.on("ping", |_, socket| {
            socket.send("pong", json!(null));
        });

        let (peer, mut rx) = SocketHandle::channel();
        network.dispatch("m:ping", &json!(null), &peer);

        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => assert_eq!(frame.kind, "m:pong"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
