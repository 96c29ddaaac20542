//! Seams to the host environment: the world collaborator and the clock.

use crate::id::WorldId;
use crate::item::ItemTemplate;
use crate::producer::SpawnPoint;
use crate::spatial::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// ---------------------------------------------------------------------------
// WorldHost
// ---------------------------------------------------------------------------

/// The host's world. Queried for loaded state, handed finished productions.
///
/// `is_location_loaded` and `is_world_available` may be called from a
/// worker thread during deferred selection; `emit_production` is only ever
/// called from the context that drives [`Scheduler::tick`].
///
/// [`Scheduler::tick`]: crate::scheduler::Scheduler::tick
pub trait WorldHost: Send + Sync {
    /// Whether the chunk containing `location` is active.
    fn is_location_loaded(&self, location: &Location) -> bool;

    /// Whether a world by this name currently exists. Records in
    /// unavailable worlds are skipped on load.
    fn is_world_available(&self, world: &WorldId) -> bool;

    /// Make `item` appear at `spawn` in `world`. Fire-and-forget.
    fn emit_production(&self, spawn: SpawnPoint, item: ItemTemplate, world: &WorldId);
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Milliseconds since construction, backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to. For hosts with their own time base
/// and for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::Release);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
