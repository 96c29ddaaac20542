//! Block locations, chunk partitioning, and the location index.
//!
//! The location index maps each occupied block to the producer standing on
//! it and keeps a per-chunk occupancy count alongside, so both the
//! one-per-block and per-chunk quota checks are O(1).

use crate::id::{ProducerId, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

/// Chunk edge length in blocks, as a shift.
pub const CHUNK_SHIFT: i32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An integer block position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A block in a specific world. Doubles as the location key: at most one
/// producer may occupy a given `Location`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldId,
    pub pos: BlockPos,
}

impl Location {
    pub fn new(world: impl Into<WorldId>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            pos: BlockPos::new(x, y, z),
        }
    }

    /// The chunk (16x16 column, all heights) containing this block.
    pub fn chunk(&self) -> ChunkKey {
        ChunkKey {
            world: self.world.clone(),
            cx: self.pos.x >> CHUNK_SHIFT,
            cz: self.pos.z >> CHUNK_SHIFT,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.world, self.pos.x, self.pos.y, self.pos.z
        )
    }
}

/// Identifies a chunk: the spatial partition used for per-area quotas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub world: WorldId,
    pub cx: i32,
    pub cz: i32,
}

/// Errors from spatial operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpatialError {
    #[error("location {0} is occupied")]
    Occupied(Location),
    #[error("location {0} is not occupied by the given producer")]
    NotPlaced(Location),
}

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

/// Location index: block -> producer, plus chunk -> occupancy count.
///
/// A block with no producer is absent from `slots`; a chunk with no
/// producers is absent from `chunk_counts`.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    slots: HashMap<Location, ProducerId>,
    chunk_counts: HashMap<ChunkKey, usize>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Placement --

    /// Occupy `location` with `id`.
    pub fn place(&mut self, location: &Location, id: ProducerId) -> Result<(), SpatialError> {
        match self.slots.entry(location.clone()) {
            Entry::Occupied(_) => return Err(SpatialError::Occupied(location.clone())),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        *self.chunk_counts.entry(location.chunk()).or_insert(0) += 1;
        Ok(())
    }

    /// Vacate `location` if (and only if) it is occupied by `id`.
    pub fn remove(&mut self, location: &Location, id: ProducerId) -> Result<(), SpatialError> {
        match self.slots.get(location) {
            Some(&occupant) if occupant == id => {}
            _ => return Err(SpatialError::NotPlaced(location.clone())),
        }
        self.slots.remove(location);

        let chunk = location.chunk();
        if let Some(count) = self.chunk_counts.get_mut(&chunk) {
            *count -= 1;
            if *count == 0 {
                self.chunk_counts.remove(&chunk);
            }
        }
        Ok(())
    }

    // -- Point queries --

    /// The producer at a location, if any.
    pub fn producer_at(&self, location: &Location) -> Option<ProducerId> {
        self.slots.get(location).copied()
    }

    pub fn is_occupied(&self, location: &Location) -> bool {
        self.slots.contains_key(location)
    }

    // -- Area queries --

    /// Number of producers in a chunk.
    pub fn count_in_chunk(&self, chunk: &ChunkKey) -> usize {
        self.chunk_counts.get(chunk).copied().unwrap_or(0)
    }

    /// Total occupied blocks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate all `(location, producer)` pairs. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&Location, ProducerId)> {
        self.slots.iter().map(|(loc, &id)| (loc, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(x: i32, y: i32, z: i32) -> Location {
        Location::new("world", x, y, z)
    }

    // -----------------------------------------------------------------------
    // Chunk math
    // -----------------------------------------------------------------------

    #[test]
    fn chunk_of_positive_and_negative_coords() {
        assert_eq!(loc(0, 64, 0).chunk().cx, 0);
        assert_eq!(loc(15, 64, 15).chunk().cz, 0);
        assert_eq!(loc(16, 64, 0).chunk().cx, 1);
        // Arithmetic shift floors toward negative infinity.
        assert_eq!(loc(-1, 64, -1).chunk().cx, -1);
        assert_eq!(loc(-16, 64, -17).chunk().cz, -2);
    }

    #[test]
    fn chunk_ignores_height() {
        assert_eq!(loc(3, 0, 3).chunk(), loc(3, 255, 3).chunk());
    }

    #[test]
    fn chunk_distinguishes_worlds() {
        let a = Location::new("world", 1, 1, 1).chunk();
        let b = Location::new("world_nether", 1, 1, 1).chunk();
        assert_ne!(a, b);
    }

    #[test]
    fn location_display_is_key_form() {
        assert_eq!(loc(1, -2, 3).to_string(), "world:1:-2:3");
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    #[test]
    fn place_and_lookup() {
        let mut index = SpatialIndex::new();
        let id = ProducerId::new();
        index.place(&loc(1, 2, 3), id).unwrap();

        assert_eq!(index.producer_at(&loc(1, 2, 3)), Some(id));
        assert!(index.is_occupied(&loc(1, 2, 3)));
        assert_eq!(index.producer_at(&loc(1, 2, 4)), None);
        assert_eq!(index.count_in_chunk(&loc(1, 2, 3).chunk()), 1);
    }

    #[test]
    fn place_occupied_fails() {
        let mut index = SpatialIndex::new();
        index.place(&loc(0, 0, 0), ProducerId::new()).unwrap();
        let result = index.place(&loc(0, 0, 0), ProducerId::new());
        assert_eq!(result, Err(SpatialError::Occupied(loc(0, 0, 0))));
        assert_eq!(index.len(), 1);
        assert_eq!(index.count_in_chunk(&loc(0, 0, 0).chunk()), 1);
    }

    #[test]
    fn remove_clears_slot_and_chunk_entry() {
        let mut index = SpatialIndex::new();
        let id = ProducerId::new();
        index.place(&loc(5, 5, 5), id).unwrap();
        index.remove(&loc(5, 5, 5), id).unwrap();

        assert!(index.is_empty());
        assert_eq!(index.count_in_chunk(&loc(5, 5, 5).chunk()), 0);
        assert!(index.chunk_counts.is_empty());
    }

    #[test]
    fn remove_wrong_occupant_fails() {
        let mut index = SpatialIndex::new();
        let id = ProducerId::new();
        index.place(&loc(5, 5, 5), id).unwrap();
        let result = index.remove(&loc(5, 5, 5), ProducerId::new());
        assert!(matches!(result, Err(SpatialError::NotPlaced(_))));
        assert_eq!(index.producer_at(&loc(5, 5, 5)), Some(id));
    }

    #[test]
    fn chunk_counts_track_multiple_producers() {
        let mut index = SpatialIndex::new();
        let ids: Vec<_> = (0..4).map(|_| ProducerId::new()).collect();
        for (i, &id) in ids.iter().enumerate() {
            index.place(&loc(i as i32, 64, 0), id).unwrap();
        }
        index.place(&loc(20, 64, 0), ProducerId::new()).unwrap();

        assert_eq!(index.count_in_chunk(&loc(0, 0, 0).chunk()), 4);
        assert_eq!(index.count_in_chunk(&loc(20, 0, 0).chunk()), 1);

        index.remove(&loc(0, 64, 0), ids[0]).unwrap();
        assert_eq!(index.count_in_chunk(&loc(0, 0, 0).chunk()), 3);
    }
}
