use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::StateError;
use super::buffer::{DEFAULT_CAPACITY, SharedState};
use super::schema::Schema;
use crate::clock::SharedClock;
use crate::net::{StateEntry, StateFlush};

const CLOSED_GRACE_MS: f64 = 5_000.0;
const STALE_AFTER_MS: f64 = 10.0 * 60.0 * 1_000.0;
const MAX_PRIOR_ENTRIES: usize = 25;

#[derive(Debug)]
struct ModuleRecord {
    streams: HashMap<String, SharedState>,
    prior: HashMap<String, VecDeque<StateEntry>>,
    client_closed_at: Option<f64>,
    server_closed_at: Option<f64>,
    last_updated: f64,
}

impl ModuleRecord {
    fn new(now: f64) -> Self {
        Self {
            streams: HashMap::new(),
            prior: HashMap::new(),
            client_closed_at: None,
            server_closed_at: None,
            last_updated: now,
        }
    }

    fn is_reapable(&self, now: f64) -> bool {
        let closed_long_ago = |at: Option<f64>| at.is_some_and(|at| now - at > CLOSED_GRACE_MS);
        closed_long_ago(self.client_closed_at)
            || closed_long_ago(self.server_closed_at)
            || now - self.last_updated > STALE_AFTER_MS
    }

    fn receive(&mut self, stream: &str, entry: StateEntry) {
        if let Some(state) = self.streams.get(stream) {
            state.receive(entry.time, entry.data);
            return;
        }
        let prior = self.prior.entry(stream.to_string()).or_default();
        prior.push_back(entry);
        while prior.len() > MAX_PRIOR_ENTRIES {
            prior.pop_front();
        }
    }
}

/// Client-side mirror of the server's state store. Flushes are routed to the
/// per-stream buffers a module defines; data for streams nobody defined yet
/// is held and replayed on `define`.
#[derive(Clone)]
pub struct StateManager {
    records: Arc<Mutex<HashMap<String, ModuleRecord>>>,
    clock: SharedClock,
}

impl StateManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn open(&self, module_id: &str) -> ModuleStates {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_reapable(now));
        if records.len() != before {
            log::debug!("Reaped {} stale state records", before - records.len());
        }
        records
            .entry(module_id.to_string())
            .or_insert_with(|| ModuleRecord::new(now));

        ModuleStates {
            manager: self.clone(),
            module_id: Arc::from(module_id),
        }
    }

    pub fn close(&self, module_id: &str) {
        let now = self.clock.now_ms();
        if let Some(record) = self.records.lock().get_mut(module_id) {
            record.client_closed_at.get_or_insert(now);
        }
    }

    pub fn receive_flush(&self, flush: StateFlush) {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        for (module_id, streams) in flush {
            if records.get(&module_id).is_some_and(|r| r.is_reapable(now)) {
                records.remove(&module_id);
            }
            let record = records
                .entry(module_id)
                .or_insert_with(|| ModuleRecord::new(now));

            let newest = streams.values().map(|e| e.time).fold(now, f64::max);
            for (stream, entry) in streams {
                record.receive(&stream, entry);
            }
            record.last_updated = record.last_updated.max(newest);
        }
    }

    /// The server closed the module: its history is worthless now.
    pub fn receive_closed(&self, module_id: &str) {
        let now = self.clock.now_ms();
        if let Some(record) = self.records.lock().get_mut(module_id) {
            record.server_closed_at.get_or_insert(now);
            record.prior.clear();
            for state in record.streams.values() {
                state.clear();
            }
        }
    }

    pub fn module_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn has_module(&self, module_id: &str) -> bool {
        self.records.lock().contains_key(module_id)
    }

    fn define(&self, module_id: &str, stream: &str, schema: Schema, capacity: usize) -> Result<SharedState, StateError> {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        let record = records
            .entry(module_id.to_string())
            .or_insert_with(|| ModuleRecord::new(now));
        if record.streams.contains_key(stream) {
            return Err(StateError::AlreadyDefined(stream.to_string()));
        }

        let state = SharedState::new(schema, capacity);
        for entry in record.prior.remove(stream).into_iter().flatten() {
            state.receive(entry.time, entry.data);
        }
        record.streams.insert(stream.to_string(), state.clone());
        Ok(state)
    }

    fn stream(&self, module_id: &str, stream: &str) -> Option<SharedState> {
        self.records.lock().get(module_id)?.streams.get(stream).cloned()
    }
}

/// A module instance's view of its state streams.
#[derive(Clone)]
pub struct ModuleStates {
    manager: StateManager,
    module_id: Arc<str>,
}

impl ModuleStates {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn define(&self, stream: &str, schema: Schema) -> Result<SharedState, StateError> {
        self.define_with_capacity(stream, schema, DEFAULT_CAPACITY)
    }

    pub fn define_with_capacity(
        &self,
        stream: &str,
        schema: Schema,
        capacity: usize,
    ) -> Result<SharedState, StateError> {
        self.manager.define(&self.module_id, stream, schema, capacity)
    }

    pub fn get(&self, stream: &str) -> Option<SharedState> {
        self.manager.stream(&self.module_id, stream)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};

    use super::*;
    use crate::clock::ManualClock;

    fn flush(module: &str, stream: &str, time: f64, data: Value) -> StateFlush {
        let mut streams = BTreeMap::new();
        streams.insert(stream.to_string(), StateEntry { time, data });
        let mut flush = BTreeMap::new();
        flush.insert(module.to_string(), streams);
        flush
    }

    fn manager() -> (StateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        (StateManager::new(clock.clone()), clock)
    }

    #[test]
    fn state_before_define_is_replayed() {
        let (manager, _) = manager();
        manager.receive_flush(flush("m", "x", 100.0, json!(1.0)));
        manager.receive_flush(flush("m", "x", 200.0, json!(3.0)));

        let states = manager.open("m");
        let x = states.define("x", Schema::lerp()).unwrap();
        assert_eq!(x.len(), 2);
        assert_eq!(x.get(150.0), Some(json!(2.0)));
    }

    #[test]
    fn duplicate_define_fails() {
        let (manager, _) = manager();
        let states = manager.open("m");
        states.define("x", Schema::lerp()).unwrap();
        assert!(matches!(
            states.define("x", Schema::nearest()),
            Err(StateError::AlreadyDefined(_))
        ));
    }

    #[test]
    fn server_close_clears_history() {
        let (manager, _) = manager();
        let states = manager.open("m");
        let x = states.define("x", Schema::lerp()).unwrap();
        manager.receive_flush(flush("m", "x", 100.0, json!(1.0)));
        assert_eq!(x.len(), 1);

        manager.receive_closed("m");
        assert!(x.is_empty());
        assert_eq!(x.get(100.0), None);
    }

    #[test]
    fn closed_records_are_reaped_after_grace() {
        let (manager, clock) = manager();
        manager.open("old");
        manager.close("old");

        clock.advance(1_000.0);
        manager.open("new");
        assert!(manager.has_module("old"));

        clock.advance(5_000.0);
        manager.open("newer");
        assert!(!manager.has_module("old"));
        assert_eq!(manager.module_count(), 2);
    }

    #[test]
    fn idle_records_go_stale() {
        let (manager, clock) = manager();
        manager.open("quiet");
        clock.advance(STALE_AFTER_MS + 1.0);
        manager.open("other");
        assert!(!manager.has_module("quiet"));
    }
}
