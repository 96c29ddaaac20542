//! Consistency tools: cross-checking the registry's indices against the
//! primary store, and diffing two producer snapshots.

use crate::id::{OwnerId, ProducerId};
use crate::producer::Producer;
use crate::registry::ProducerRegistry;
use crate::spatial::Location;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Index violations
// ---------------------------------------------------------------------------

/// One disagreement between the store and a derived index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexViolation {
    /// Producer in the store but not at its location in the location index.
    MissingFromSpatial { producer: ProducerId, location: Location },
    /// Location index entry pointing at an id the store does not hold.
    DanglingSpatial { location: Location, producer: ProducerId },
    /// Producer in the store but not under its owner in the owner index.
    MissingFromOwners { producer: ProducerId, owner: OwnerId },
    /// Owner index entries do not add up to the store size.
    OwnerTotalMismatch { indexed: usize, stored: usize },
    /// Chunk occupancy count disagrees with the store.
    ChunkCountMismatch { location: Location, indexed: usize, stored: usize },
}

impl ProducerRegistry {
    /// Check every producer is reachable through both indices and that the
    /// indices hold nothing else. Empty means consistent.
    pub fn validate_indices(&self) -> Vec<IndexViolation> {
        self.with_structures(|producers, spatial, owners| {
            let mut violations = Vec::new();
            let mut per_chunk: HashMap<_, (Location, usize)> = HashMap::new();

            for (&id, producer) in producers {
                if spatial.producer_at(producer.location()) != Some(id) {
                    violations.push(IndexViolation::MissingFromSpatial {
                        producer: id,
                        location: producer.location().clone(),
                    });
                }
                if !owners.contains(producer.owner(), id) {
                    violations.push(IndexViolation::MissingFromOwners {
                        producer: id,
                        owner: producer.owner(),
                    });
                }
                per_chunk
                    .entry(producer.location().chunk())
                    .or_insert_with(|| (producer.location().clone(), 0))
                    .1 += 1;
            }

            for (location, id) in spatial.iter() {
                if !producers.contains_key(&id) {
                    violations.push(IndexViolation::DanglingSpatial {
                        location: location.clone(),
                        producer: id,
                    });
                }
            }

            if owners.total() != producers.len() {
                violations.push(IndexViolation::OwnerTotalMismatch {
                    indexed: owners.total(),
                    stored: producers.len(),
                });
            }

            for (chunk, (location, stored)) in per_chunk {
                let indexed = spatial.count_in_chunk(&chunk);
                if indexed != stored {
                    violations.push(IndexViolation::ChunkCountMismatch {
                        location,
                        indexed,
                        stored,
                    });
                }
            }

            violations
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot diff
// ---------------------------------------------------------------------------

/// Difference between two producer snapshots, matched by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerDiff {
    OnlyInA(ProducerId),
    OnlyInB(ProducerId),
    /// Present in both with differing persisted fields.
    ConfigMismatch { producer: ProducerId, fields: Vec<&'static str> },
}

/// Compare the persisted fields of two snapshots. The runtime timestamp is
/// ignored since it never survives a save.
pub fn diff_producers(a: &[Producer], b: &[Producer]) -> Vec<ProducerDiff> {
    let b_by_id: HashMap<ProducerId, &Producer> = b.iter().map(|p| (p.id(), p)).collect();
    let a_ids: HashSet<ProducerId> = a.iter().map(Producer::id).collect();
    let mut diffs = Vec::new();

    for pa in a {
        let Some(pb) = b_by_id.get(&pa.id()) else {
            diffs.push(ProducerDiff::OnlyInA(pa.id()));
            continue;
        };

        let mut fields = Vec::new();
        if pa.location() != pb.location() {
            fields.push("location");
        }
        if pa.owner() != pb.owner() {
            fields.push("owner");
        }
        if pa.items() != pb.items() {
            fields.push("items");
        }
        if pa.spawn_rate() != pb.spawn_rate() {
            fields.push("spawn_rate");
        }
        if pa.direction() != pb.direction() {
            fields.push("direction");
        }
        if pa.is_enabled() != pb.is_enabled() {
            fields.push("enabled");
        }
        if !fields.is_empty() {
            diffs.push(ProducerDiff::ConfigMismatch {
                producer: pa.id(),
                fields,
            });
        }
    }

    for pb in b {
        if !a_ids.contains(&pb.id()) {
            diffs.push(ProducerDiff::OnlyInB(pb.id()));
        }
    }

    diffs
}
