//! Per-actor interaction state for the presentation layer: whether an actor
//! is in creation mode, and which producer's configuration panel they have
//! open. Kept apart from the registry; the registry never reads it.

use crate::id::{OwnerId, ProducerId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SessionTracker {
    creation_mode: RwLock<HashSet<OwnerId>>,
    open_panels: RwLock<HashMap<OwnerId, ProducerId>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Creation mode --

    pub fn set_creation_mode(&self, actor: OwnerId, enabled: bool) {
        let mut modes = self.creation_mode.write();
        if enabled {
            modes.insert(actor);
        } else {
            modes.remove(&actor);
        }
    }

    /// Flip creation mode for `actor`. Returns the new state.
    pub fn toggle_creation_mode(&self, actor: OwnerId) -> bool {
        let mut modes = self.creation_mode.write();
        if modes.remove(&actor) {
            false
        } else {
            modes.insert(actor);
            true
        }
    }

    pub fn in_creation_mode(&self, actor: OwnerId) -> bool {
        self.creation_mode.read().contains(&actor)
    }

    // -- Panels --

    /// Record that `actor` is viewing `producer`. Replaces any panel the
    /// actor had open and returns it.
    pub fn open_panel(&self, actor: OwnerId, producer: ProducerId) -> Option<ProducerId> {
        self.open_panels.write().insert(actor, producer)
    }

    pub fn close_panel(&self, actor: OwnerId) -> Option<ProducerId> {
        self.open_panels.write().remove(&actor)
    }

    pub fn open_panel_of(&self, actor: OwnerId) -> Option<ProducerId> {
        self.open_panels.read().get(&actor).copied()
    }

    /// Close every panel showing `producer`. Returns the actors affected so
    /// the caller can close their views.
    pub fn forget_producer(&self, producer: ProducerId) -> Vec<OwnerId> {
        let mut panels = self.open_panels.write();
        let affected: Vec<OwnerId> = panels
            .iter()
            .filter(|(_, open)| **open == producer)
            .map(|(actor, _)| *actor)
            .collect();
        for actor in &affected {
            panels.remove(actor);
        }
        affected
    }

    /// Drop all state for an actor that left.
    pub fn end_session(&self, actor: OwnerId) {
        self.creation_mode.write().remove(&actor);
        self.open_panels.write().remove(&actor);
    }
}
