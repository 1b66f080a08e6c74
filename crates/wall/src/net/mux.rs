use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::socket::SocketHandle;

pub type Handler = Arc<dyn Fn(&Value, &SocketHandle) + Send + Sync>;

/// Type-keyed handler table shared by everything that listens on one
/// connection (or, on the server, on all of them).
#[derive(Default)]
pub struct EventMux {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl fmt::Debug for EventMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMux")
            .field("kinds", &self.kinds())
            .field("handlers", &self.total_handlers())
            .finish()
    }
}

impl EventMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: impl Into<String>, handler: Handler) {
        self.handlers
            .lock()
            .entry(kind.into())
            .or_default()
            .push(handler);
    }

    pub fn remove_all(&self, kind: &str) -> usize {
        self.handlers.lock().remove(kind).map_or(0, |h| h.len())
    }

    /// Runs every handler for `kind` and returns how many ran. Handlers are
    /// invoked outside the lock so they may register further handlers.
    pub fn dispatch(&self, kind: &str, payload: &Value, socket: &SocketHandle) -> usize {
        let handlers = match self.handlers.lock().get(kind) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler(payload, socket);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers.lock().get(kind).map_or(0, Vec::len)
    }

    pub fn total_handlers(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.lock().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// A shared connection that overlays can be layered on: a handler table plus
/// a way to send.
pub trait Multiplexer: Send + Sync + 'static {
    fn events(&self) -> &EventMux;

    fn send(&self, kind: &str, payload: Value);
}
