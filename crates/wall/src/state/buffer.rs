use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::schema::Schema;

pub const DEFAULT_CAPACITY: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub time: f64,
    pub value: Value,
}

/// Time-ordered history of one state stream, bounded to `capacity` entries.
#[derive(Debug)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
    schema: Schema,
}

impl SnapshotBuffer {
    pub fn new(schema: Schema, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            schema,
        }
    }

    /// Inserts in time order. A snapshot for an already buffered time
    /// replaces it; the oldest entries fall off once over capacity.
    pub fn push(&mut self, time: f64, value: Value) {
        if !time.is_finite() {
            log::warn!("Ignoring state snapshot with time {}", time);
            return;
        }

        let index = self.snapshots.partition_point(|s| s.time < time);
        match self.snapshots.get_mut(index) {
            Some(existing) if existing.time == time => existing.value = value,
            _ => self.snapshots.insert(index, Snapshot { time, value }),
        }

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    /// The pair of snapshots around `t`. Outside the buffered range both
    /// sides are the nearest end.
    pub fn bracket(&self, t: f64) -> Option<(&Snapshot, &Snapshot)> {
        let first = self.snapshots.front()?;
        let last = self.snapshots.back()?;
        if t <= first.time {
            return Some((first, first));
        }
        if t >= last.time {
            return Some((last, last));
        }
        let after = self.snapshots.partition_point(|s| s.time <= t);
        Some((&self.snapshots[after - 1], &self.snapshots[after]))
    }

    pub fn get(&self, t: f64) -> Option<Value> {
        let (a, b) = self.bracket(t)?;
        self.schema
            .evaluate(t, a.time, Some(&a.value), b.time, Some(&b.value))
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn earliest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Shared handle to one stream's buffer. The network side pushes, render code
/// reads.
#[derive(Debug, Clone)]
pub struct SharedState {
    buffer: Arc<Mutex<SnapshotBuffer>>,
}

impl SharedState {
    pub fn new(schema: Schema, capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(SnapshotBuffer::new(schema, capacity))),
        }
    }

    pub fn receive(&self, time: f64, value: Value) {
        self.buffer.lock().push(time, value);
    }

    pub fn get(&self, t: f64) -> Option<Value> {
        self.buffer.lock().get(t)
    }

    pub fn latest_time(&self) -> Option<f64> {
        self.buffer.lock().latest().map(|s| s.time)
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn out_of_order_and_duplicate_times() {
        let mut buffer = SnapshotBuffer::new(Schema::lerp(), 8);
        buffer.push(20.0, json!(2.0));
        buffer.push(10.0, json!(1.0));
        buffer.push(30.0, json!(3.0));
        buffer.push(20.0, json!(5.0));

        let times: Vec<f64> = buffer.snapshots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![10.0, 20.0, 30.0]);
        assert_eq!(buffer.get(20.0), Some(json!(5.0)));
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut buffer = SnapshotBuffer::new(Schema::lerp(), 25);
        for i in 0..40 {
            buffer.push(i as f64, json!(i));
        }
        assert_eq!(buffer.len(), 25);
        assert_eq!(buffer.earliest().map(|s| s.time), Some(15.0));
    }

    #[test]
    fn clamps_outside_range() {
        let mut buffer = SnapshotBuffer::new(Schema::lerp(), 4);
        assert_eq!(buffer.get(0.0), None);

        buffer.push(100.0, json!(1.0));
        buffer.push(200.0, json!(3.0));

        assert_eq!(buffer.get(50.0), Some(json!(1.0)));
        assert_eq!(buffer.get(150.0), Some(json!(2.0)));
        assert_eq!(buffer.get(999.0), Some(json!(3.0)));
    }

    #[test]
    fn single_snapshot_answers_everything() {
        let mut buffer = SnapshotBuffer::new(Schema::nearest(), 4);
        buffer.push(10.0, json!("only"));
        assert_eq!(buffer.get(0.0), Some(json!("only")));
        assert_eq!(buffer.get(10.0), Some(json!("only")));
        assert_eq!(buffer.get(20.0), Some(json!("only")));
    }

    #[test]
    fn exact_hit_is_not_blended() {
        let mut buffer = SnapshotBuffer::new(Schema::nearest(), 4);
        buffer.push(0.0, json!("a"));
        buffer.push(10.0, json!("b"));
        buffer.push(20.0, json!("c"));
        assert_eq!(buffer.get(10.0), Some(json!("b")));
    }

    #[test]
    fn nearest_tie_keeps_the_earlier_value() {
        let mut buffer = SnapshotBuffer::new(Schema::nearest(), 4);
        buffer.push(0.0, json!("a"));
        buffer.push(100.0, json!("b"));
        assert_eq!(buffer.get(50.0), Some(json!("a")));
        assert_eq!(buffer.get(50.5), Some(json!("b")));
    }
}
