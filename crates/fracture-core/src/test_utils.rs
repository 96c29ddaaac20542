//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and, via the `test-utils` feature, in other
//! crates' tests.

use crate::config::{Settings, SettingsHandle};
use crate::host::{Clock, ManualClock, WorldHost};
use crate::id::{OwnerId, WorldId};
use crate::item::ItemTemplate;
use crate::producer::SpawnPoint;
use crate::registry::ProducerRegistry;
use crate::spatial::Location;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

// ===========================================================================
// Locations and owners
// ===========================================================================

pub const TEST_WORLD: &str = "world";

/// A block in the default test world.
pub fn loc(x: i32, y: i32, z: i32) -> Location {
    Location::new(TEST_WORLD, x, y, z)
}

pub fn owner(n: u128) -> OwnerId {
    OwnerId::from_u128(n)
}

pub fn alice() -> OwnerId {
    owner(1)
}

pub fn bob() -> OwnerId {
    owner(2)
}

// ===========================================================================
// Registry construction
// ===========================================================================

pub fn manual_clock(start: u64) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start))
}

pub fn make_registry(settings: Settings, clock: Arc<dyn Clock>) -> ProducerRegistry {
    ProducerRegistry::new(Arc::new(SettingsHandle::new(settings)), clock)
}

/// Default settings, clock frozen at 0.
pub fn default_registry() -> ProducerRegistry {
    make_registry(Settings::default(), manual_clock(0))
}

// ===========================================================================
// RecordingHost
// ===========================================================================

/// One `emit_production` call captured by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub spawn: SpawnPoint,
    pub item: ItemTemplate,
    pub world: WorldId,
}

/// A host where everything is loaded and every world exists unless told
/// otherwise. Records every emitted production.
#[derive(Debug, Default)]
pub struct RecordingHost {
    unloaded: Mutex<HashSet<Location>>,
    missing_worlds: Mutex<HashSet<WorldId>>,
    emitted: Mutex<Vec<Emission>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unload(&self, location: &Location) {
        self.unloaded.lock().insert(location.clone());
    }

    pub fn load(&self, location: &Location) {
        self.unloaded.lock().remove(location);
    }

    pub fn remove_world(&self, world: impl Into<WorldId>) {
        self.missing_worlds.lock().insert(world.into());
    }

    pub fn restore_world(&self, world: impl Into<WorldId>) {
        self.missing_worlds.lock().remove(&world.into());
    }

    /// Copy of everything emitted so far.
    pub fn emitted(&self) -> Vec<Emission> {
        self.emitted.lock().clone()
    }

    pub fn clear(&self) {
        self.emitted.lock().clear();
    }
}

impl WorldHost for RecordingHost {
    fn is_location_loaded(&self, location: &Location) -> bool {
        !self.unloaded.lock().contains(location)
            && !self.missing_worlds.lock().contains(&location.world)
    }

    fn is_world_available(&self, world: &WorldId) -> bool {
        !self.missing_worlds.lock().contains(world)
    }

    fn emit_production(&self, spawn: SpawnPoint, item: ItemTemplate, world: &WorldId) {
        self.emitted.lock().push(Emission {
            spawn,
            item,
            world: world.clone(),
        });
    }
}
