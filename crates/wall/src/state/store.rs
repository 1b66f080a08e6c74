use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::net::{Broadcast, StateEntry, StateFlush, kind};

#[derive(Debug, Default)]
struct StoreInner {
    modules: StateFlush,
    changed: bool,
    last_flush_empty: bool,
    flushes_sent: u64,
    flushes_skipped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub sent: u64,
    pub skipped: u64,
}

/// Latest value of every stream of every live module. `flush` sends the whole
/// table to all clients.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
    network: Arc<dyn Broadcast>,
}

impl StateStore {
    pub fn new(network: Arc<dyn Broadcast>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            network,
        }
    }

    pub fn open(&self, module_id: &str) -> ModuleState {
        let mut inner = self.inner.lock();
        if !inner.modules.contains_key(module_id) {
            inner.modules.insert(module_id.to_string(), Default::default());
            inner.changed = true;
        }
        ModuleState {
            store: self.clone(),
            module_id: Arc::from(module_id),
        }
    }

    /// Forgets a module and tells clients to drop its history. Closing an
    /// unknown module does nothing.
    pub fn close(&self, module_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.modules.remove(module_id).is_some();
            inner.changed |= removed;
            removed
        };
        if removed {
            self.network
                .broadcast(kind::STATE_CLOSED, Value::String(module_id.to_string()));
        }
        removed
    }

    /// Broadcasts the table unless nothing changed since a flush that was
    /// already empty.
    pub fn flush(&self) -> bool {
        let payload = {
            let mut inner = self.inner.lock();
            if !inner.changed && inner.last_flush_empty {
                inner.flushes_skipped += 1;
                return false;
            }
            let payload = match serde_json::to_value(&inner.modules) {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("Failed to encode state flush: {}", e);
                    return false;
                }
            };
            inner.changed = false;
            inner.last_flush_empty = inner.modules.is_empty();
            inner.flushes_sent += 1;
            payload
        };
        self.network.broadcast(kind::STATE, payload);
        true
    }

    pub fn is_open(&self, module_id: &str) -> bool {
        self.inner.lock().modules.contains_key(module_id)
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.inner.lock().modules.keys().cloned().collect()
    }

    pub fn stats(&self) -> FlushStats {
        let inner = self.inner.lock();
        FlushStats {
            sent: inner.flushes_sent,
            skipped: inner.flushes_skipped,
        }
    }

    fn store(&self, module_id: &str, stream: &str, time: f64, data: Value) -> bool {
        let mut inner = self.inner.lock();
        let Some(streams) = inner.modules.get_mut(module_id) else {
            log::trace!("{}: dropping {} after close", module_id, stream);
            return false;
        };
        streams.insert(stream.to_string(), StateEntry { time, data });
        inner.changed = true;
        true
    }
}

/// Write handle for one module instance.
#[derive(Clone)]
pub struct ModuleState {
    store: StateStore,
    module_id: Arc<str>,
}

impl ModuleState {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Records the latest value of `stream`. Returns false once the module's
    /// state has been closed.
    pub fn store(&self, stream: &str, time: f64, data: Value) -> bool {
        self.store.store(&self.module_id, stream, time, data)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl Broadcast for Recorder {
        fn broadcast(&self, kind: &str, payload: Value) -> usize {
            self.sent.lock().push((kind.to_string(), payload));
            1
        }
    }

    fn store() -> (StateStore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (StateStore::new(recorder.clone()), recorder)
    }

    #[test]
    fn flush_carries_latest_value_per_stream() {
        let (store, recorder) = store();
        let module = store.open("1-1000");
        module.store("balls", 1.0, json!([1]));
        module.store("balls", 2.0, json!([2]));

        assert!(store.flush());
        let sent = recorder.sent.lock();
        assert_eq!(sent[0].0, "state");
        assert_eq!(
            sent[0].1,
            json!({ "1-1000": { "balls": { "time": 2.0, "data": [2] } } })
        );
    }

    #[test]
    fn close_broadcasts_once_and_stops_stores() {
        let (store, recorder) = store();
        let module = store.open("a");

        assert!(store.close("a"));
        assert!(!store.close("a"));
        assert!(!store.close("never-opened"));
        assert!(!module.store("x", 1.0, json!(1)));

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("state-closed".to_string(), json!("a")));
    }

    #[test]
    fn idle_flushes_are_skipped() {
        let (store, recorder) = store();

        assert!(store.flush());
        assert!(!store.flush());
        assert!(!store.flush());

        store.open("m").store("s", 1.0, json!(0));
        assert!(store.flush());
        // unchanged but not empty, keep feeding late joiners
        assert!(store.flush());

        store.close("m");
        assert!(store.flush());
        assert!(!store.flush());

        assert_eq!(store.stats(), FlushStats { sent: 4, skipped: 3 });
        let states = recorder.sent.lock().iter().filter(|(k, _)| k == "state").count();
        assert_eq!(states, 4);
    }
}
