//! Owner index: owner -> the set of producers it created.

use crate::id::{OwnerId, ProducerId};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Derived lookup from owner to owned producer ids. An owner with no
/// producers has no entry.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    owned: HashMap<OwnerId, IndexSet<ProducerId>>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as owned by `owner`. Returns false if already recorded.
    pub fn insert(&mut self, owner: OwnerId, id: ProducerId) -> bool {
        self.owned.entry(owner).or_default().insert(id)
    }

    /// Forget `id` under `owner`, dropping the owner entry once empty.
    pub fn remove(&mut self, owner: OwnerId, id: ProducerId) -> bool {
        let Some(set) = self.owned.get_mut(&owner) else {
            return false;
        };
        let removed = set.shift_remove(&id);
        if set.is_empty() {
            self.owned.remove(&owner);
        }
        removed
    }

    /// Number of producers owned by `owner`.
    pub fn count(&self, owner: OwnerId) -> usize {
        self.owned.get(&owner).map_or(0, IndexSet::len)
    }

    /// Ids owned by `owner`, in insertion order.
    pub fn ids(&self, owner: OwnerId) -> impl Iterator<Item = ProducerId> + '_ {
        self.owned.get(&owner).into_iter().flatten().copied()
    }

    pub fn contains(&self, owner: OwnerId, id: ProducerId) -> bool {
        self.owned.get(&owner).is_some_and(|set| set.contains(&id))
    }

    /// Number of distinct owners.
    pub fn owner_count(&self) -> usize {
        self.owned.len()
    }

    /// Total ids across all owners.
    pub fn total(&self) -> usize {
        self.owned.values().map(IndexSet::len).sum()
    }
}
