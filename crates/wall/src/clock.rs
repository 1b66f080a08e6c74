use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// Source of server-time milliseconds. Everything that reads time takes one of
/// these instead of touching the system clock directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;

    /// Time left until `deadline_ms`, zero if it already passed.
    fn until(&self, deadline_ms: f64) -> Duration {
        let remaining = (deadline_ms - self.now_ms()).max(0.0);
        Duration::from_secs_f64(remaining / 1000.0)
    }

    fn in_future(&self, ms: f64) -> f64 {
        self.now_ms() + ms
    }
}

pub type SharedClock = Arc<dyn Clock>;

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> f64 {
        (**self).now_ms()
    }
}

pub fn current_time_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// The authoritative clock of the coordinator: unix epoch milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        current_time_ms()
    }
}

/// Local, monotonic milliseconds used to measure time since a reference arrived.
pub trait LocalTime: Send + Sync {
    fn local_ms(&self) -> f64;
}

impl<T: LocalTime + ?Sized> LocalTime for Arc<T> {
    fn local_ms(&self) -> f64 {
        (**self).local_ms()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicTime {
    origin: Instant,
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl LocalTime for MonotonicTime {
    fn local_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReference {
    pub server_time_ms: f64,
    pub local_time_at_receipt_ms: f64,
}

impl ClockReference {
    pub fn now_ms(&self, local_now_ms: f64) -> f64 {
        local_now_ms - self.local_time_at_receipt_ms + self.server_time_ms
    }
}

/// A clock that follows the server: every `time` message replaces the
/// reference, so `now_ms` may jump backwards across updates.
pub struct AdjustableClock<L: LocalTime = MonotonicTime> {
    local: L,
    reference: RwLock<ClockReference>,
}

impl Default for AdjustableClock {
    fn default() -> Self {
        Self::new(MonotonicTime::default())
    }
}

impl<L: LocalTime> AdjustableClock<L> {
    pub fn new(local: L) -> Self {
        let reference = ClockReference {
            server_time_ms: 0.0,
            local_time_at_receipt_ms: local.local_ms(),
        };
        Self {
            local,
            reference: RwLock::new(reference),
        }
    }

    pub fn adjust(&self, server_time_ms: f64) {
        let reference = ClockReference {
            server_time_ms,
            local_time_at_receipt_ms: self.local.local_ms(),
        };
        log::debug!(
            "Clock adjusted by {:.1} ms",
            server_time_ms - self.now_ms()
        );
        *self.reference.write() = reference;
    }

    pub fn reference(&self) -> ClockReference {
        *self.reference.read()
    }
}

impl<L: LocalTime> Clock for AdjustableClock<L> {
    fn now_ms(&self) -> f64 {
        self.reference.read().now_ms(self.local.local_ms())
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(ms: f64) -> Self {
        Self {
            bits: AtomicU64::new(ms.to_bits()),
        }
    }

    pub fn set(&self, ms: f64) {
        self.bits.store(ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, ms: f64) {
        self.set(self.now_ms() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

impl LocalTime for ManualClock {
    fn local_ms(&self) -> f64 {
        self.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustable_clock_follows_reference() {
        let local = Arc::new(ManualClock::new(500.0));
        let clock = AdjustableClock::new(Arc::clone(&local));

        clock.adjust(10_000.0);
        assert_eq!(clock.now_ms(), 10_000.0);

        local.advance(250.0);
        assert_eq!(clock.now_ms(), 10_250.0);
    }

    #[test]
    fn reference_update_may_move_backwards() {
        let local = Arc::new(ManualClock::new(0.0));
        let clock = AdjustableClock::new(Arc::clone(&local));

        clock.adjust(5_000.0);
        local.advance(100.0);
        clock.adjust(4_900.0);

        assert_eq!(clock.now_ms(), 4_900.0);
    }

    #[test]
    fn until_never_negative() {
        let clock = ManualClock::new(2_000.0);
        assert_eq!(clock.until(1_000.0), Duration::ZERO);
        assert_eq!(clock.until(2_500.0), Duration::from_millis(500));
    }
}
