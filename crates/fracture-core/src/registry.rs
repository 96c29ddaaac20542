//! The producer registry: primary store plus the location and owner indices.
//!
//! # Locking
//!
//! Each structure sits behind its own [`RwLock`]. Mutators that touch the
//! indices (create, remove, restore) take all three write locks in the fixed
//! order store -> spatial -> owners, so readers never see the store and an
//! index disagree. Readers that consult two structures take read locks in
//! the same order. Configuration changes touch only the store.
//!
//! Host callbacks (`is_location_loaded`) run under the store read lock and
//! must not call back into the registry's mutators.

use crate::config::{Settings, SettingsHandle};
use crate::host::{Clock, WorldHost};
use crate::id::{OwnerId, ProducerId};
use crate::item::ItemTemplate;
use crate::owners::OwnerIndex;
use crate::producer::{Direction, Producer};
use crate::rng::SimRng;
use crate::scheduler::Production;
use crate::spatial::{ChunkKey, Location, SpatialIndex};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a placement request was refused. Checked in declaration order; the
/// first failing check wins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("location {0} already hosts a producer")]
    OccupiedLocation(Location),
    #[error("owner {owner} already has the maximum of {limit} producers")]
    OwnerQuotaExceeded { owner: OwnerId, limit: usize },
    #[error("chunk already holds the maximum of {limit} producers")]
    RegionQuotaExceeded { chunk: ChunkKey, limit: usize },
}

/// Errors from configuration operations on an existing producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown producer {0}")]
    UnknownProducer(ProducerId),
    #[error("producer already has the maximum of {limit} item types")]
    ItemLimitReached { limit: usize },
    #[error("item index {index} out of range (len {len})")]
    ItemIndexOutOfRange { index: usize, len: usize },
}

// ---------------------------------------------------------------------------
// Snapshots and reports
// ---------------------------------------------------------------------------

/// A point-in-time copy of every producer, tagged with the store revision.
/// Higher revisions reflect strictly later state.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub revision: u64,
    pub producers: Vec<Producer>,
}

/// Told the new store revision after every persisted mutation. The call
/// happens on the mutating caller's thread and must not block. The sink
/// pulls the state itself through a [`SnapshotSource`] when it is ready to
/// write.
pub trait SaveSink: Send + Sync {
    fn notify(&self, revision: u64);
}

/// Something a saver can pull a consistent copy of the producer set from.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> RegistrySnapshot;
}

impl SnapshotSource for ProducerRegistry {
    fn snapshot(&self) -> RegistrySnapshot {
        ProducerRegistry::snapshot(self)
    }
}

/// Aggregate counts over one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

/// Outcome of [`ProducerRegistry::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub duplicate_ids: usize,
    pub occupied_locations: usize,
}

/// Result of one eligibility scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Timestamp the scan evaluated eligibility at.
    pub now: u64,
    /// Eligible producers before the budget was applied.
    pub eligible: usize,
    /// The first `budget` eligible producers, in store order.
    pub ids: Vec<ProducerId>,
}

// ---------------------------------------------------------------------------
// ProducerRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Store {
    /// Insertion order is creation order; scans iterate in this order.
    producers: IndexMap<ProducerId, Producer>,
    /// Bumped on every persisted mutation.
    revision: u64,
}

/// The single source of truth for producers.
pub struct ProducerRegistry {
    store: RwLock<Store>,
    spatial: RwLock<SpatialIndex>,
    owners: RwLock<OwnerIndex>,
    settings: Arc<SettingsHandle>,
    clock: Arc<dyn Clock>,
    save_sink: Option<Arc<dyn SaveSink>>,
}

impl fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        f.debug_struct("ProducerRegistry")
            .field("producers", &store.producers.len())
            .field("revision", &store.revision)
            .field("persisted", &self.save_sink.is_some())
            .finish()
    }
}

impl ProducerRegistry {
    pub fn new(settings: Arc<SettingsHandle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            spatial: RwLock::new(SpatialIndex::new()),
            owners: RwLock::new(OwnerIndex::new()),
            settings,
            clock,
            save_sink: None,
        }
    }

    /// Notify `sink` of the new revision after every persisted mutation.
    pub fn with_save_sink(mut self, sink: Arc<dyn SaveSink>) -> Self {
        self.save_sink = Some(sink);
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load()
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    // -----------------------------------------------------------------------
    // Creation and removal
    // -----------------------------------------------------------------------

    /// Place a new producer with default configuration.
    pub fn create(&self, location: Location, owner: OwnerId) -> Result<ProducerId, Rejection> {
        let settings = self.settings.load();
        let now = self.clock.now_millis();

        let id = {
            let mut store = self.store.write();
            let mut spatial = self.spatial.write();
            let mut owners = self.owners.write();

            if spatial.is_occupied(&location) {
                debug!(location = %location, "placement rejected: occupied");
                return Err(Rejection::OccupiedLocation(location));
            }

            let owner_limit = settings.performance.max_generators_per_player;
            if owners.count(owner) >= owner_limit {
                debug!(owner = %owner, limit = owner_limit, "placement rejected: owner quota");
                return Err(Rejection::OwnerQuotaExceeded {
                    owner,
                    limit: owner_limit,
                });
            }

            let chunk = location.chunk();
            let chunk_limit = settings.performance.max_generators_per_chunk;
            if spatial.count_in_chunk(&chunk) >= chunk_limit {
                debug!(location = %location, limit = chunk_limit, "placement rejected: chunk quota");
                return Err(Rejection::RegionQuotaExceeded {
                    chunk,
                    limit: chunk_limit,
                });
            }

            let mut id = ProducerId::new();
            while store.producers.contains_key(&id) {
                id = ProducerId::new();
            }

            spatial
                .place(&location, id)
                .map_err(|_| Rejection::OccupiedLocation(location.clone()))?;
            owners.insert(owner, id);
            store
                .producers
                .insert(id, Producer::new(id, location.clone(), owner, &settings, now));
            store.revision += 1;
            id
        };

        debug!(producer = %id, location = %location, owner = %owner, "producer created");
        self.schedule_save();
        Ok(id)
    }

    /// Remove a producer. Returns `false` if the id is unknown.
    pub fn remove(&self, id: ProducerId) -> bool {
        let removed = {
            let mut store = self.store.write();
            let mut spatial = self.spatial.write();
            let mut owners = self.owners.write();
            remove_locked(&mut store, &mut spatial, &mut owners, id)
        };

        match removed {
            Some(producer) => {
                debug!(producer = %id, location = %producer.location(), "producer removed");
                self.schedule_save();
                true
            }
            None => false,
        }
    }

    /// Remove whatever producer stands at `location`, e.g. because the host
    /// reports the block is gone.
    pub fn remove_at(&self, location: &Location) -> Option<ProducerId> {
        let removed = {
            let mut store = self.store.write();
            let mut spatial = self.spatial.write();
            let mut owners = self.owners.write();
            let id = spatial.producer_at(location)?;
            remove_locked(&mut store, &mut spatial, &mut owners, id).map(|p| p.id())
        };

        if let Some(id) = removed {
            debug!(producer = %id, location = %location, "producer removed with its block");
            self.schedule_save();
        }
        removed
    }

    /// Insert previously persisted producers, bypassing quotas. Entries that
    /// collide with an existing id or location are skipped.
    pub fn restore(&self, producers: impl IntoIterator<Item = Producer>) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut store = self.store.write();
        let mut spatial = self.spatial.write();
        let mut owners = self.owners.write();

        for producer in producers {
            let id = producer.id();
            if store.producers.contains_key(&id) {
                warn!(producer = %id, "skipping restored producer: duplicate id");
                report.duplicate_ids += 1;
                continue;
            }
            if spatial.place(producer.location(), id).is_err() {
                warn!(
                    producer = %id,
                    location = %producer.location(),
                    "skipping restored producer: location already occupied"
                );
                report.occupied_locations += 1;
                continue;
            }
            owners.insert(producer.owner(), id);
            store.producers.insert(id, producer);
            report.restored += 1;
        }
        store.revision += 1;
        report
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The producer occupying `location`, if any.
    pub fn find_at(&self, location: &Location) -> Option<ProducerId> {
        self.spatial.read().producer_at(location)
    }

    pub fn get(&self, id: ProducerId) -> Option<Producer> {
        self.store.read().producers.get(&id).cloned()
    }

    pub fn contains(&self, id: ProducerId) -> bool {
        self.store.read().producers.contains_key(&id)
    }

    /// Snapshot of every producer owned by `owner`.
    pub fn list_by_owner(&self, owner: OwnerId) -> Vec<Producer> {
        let store = self.store.read();
        let owners = self.owners.read();
        owners
            .ids(owner)
            .filter_map(|id| store.producers.get(&id).cloned())
            .collect()
    }

    /// Snapshot of every producer, in creation order.
    pub fn list_all(&self) -> Vec<Producer> {
        self.store.read().producers.values().cloned().collect()
    }

    pub fn count_by_owner(&self, owner: OwnerId) -> usize {
        self.owners.read().count(owner)
    }

    /// Producers in the chunk containing `location`.
    pub fn count_in_region(&self, location: &Location) -> usize {
        self.spatial.read().count_in_chunk(&location.chunk())
    }

    pub fn len(&self) -> usize {
        self.store.read().producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().producers.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let store = self.store.read();
        let total = store.producers.len();
        let enabled = store.producers.values().filter(|p| p.is_enabled()).count();
        RegistryStats {
            total,
            enabled,
            disabled: total - enabled,
        }
    }

    pub fn revision(&self) -> u64 {
        self.store.read().revision
    }

    /// Copy of the full store under a single read lock.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let store = self.store.read();
        RegistrySnapshot {
            revision: store.revision,
            producers: store.producers.values().cloned().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Replace the item table. Clamped to `max-item-types`; an empty table
    /// gets the default template.
    pub fn set_items(&self, id: ProducerId, items: Vec<ItemTemplate>) -> Result<(), RegistryError> {
        self.configure(id, |producer, settings| {
            producer.set_items(items, settings.generators.max_item_types);
            Ok(())
        })
    }

    /// Append one template.
    pub fn add_item(&self, id: ProducerId, item: ItemTemplate) -> Result<(), RegistryError> {
        self.configure(id, |producer, settings| {
            let limit = settings.generators.max_item_types;
            if producer.items().len() >= limit {
                return Err(RegistryError::ItemLimitReached { limit });
            }
            producer.items_mut().push(item);
            Ok(())
        })
    }

    /// Remove the template at `index`, returning it. The default template is
    /// substituted if the table empties.
    pub fn remove_item(&self, id: ProducerId, index: usize) -> Result<ItemTemplate, RegistryError> {
        self.configure(id, |producer, _| {
            let len = producer.items().len();
            if index >= len {
                return Err(RegistryError::ItemIndexOutOfRange { index, len });
            }
            let items = producer.items_mut();
            let removed = items.remove(index);
            if items.is_empty() {
                items.push(ItemTemplate::default());
            }
            Ok(removed)
        })
    }

    /// Set the spawn rate, clamped to `[1, max-spawn-rate]`. Returns the
    /// effective rate.
    pub fn set_spawn_rate(&self, id: ProducerId, rate: i64) -> Result<u32, RegistryError> {
        self.configure(id, |producer, settings| {
            let rate = settings.clamp_spawn_rate(rate);
            producer.set_spawn_rate(rate);
            Ok(rate)
        })
    }

    /// Step the spawn rate by `delta`, clamped. Returns the effective rate.
    pub fn adjust_spawn_rate(&self, id: ProducerId, delta: i64) -> Result<u32, RegistryError> {
        self.configure(id, |producer, settings| {
            let requested = i64::from(producer.spawn_rate()).saturating_add(delta);
            let rate = settings.clamp_spawn_rate(requested);
            producer.set_spawn_rate(rate);
            Ok(rate)
        })
    }

    pub fn set_direction(&self, id: ProducerId, direction: Direction) -> Result<(), RegistryError> {
        self.configure(id, |producer, _| {
            producer.set_direction(direction);
            Ok(())
        })
    }

    /// Advance to the next direction mode. Returns the new mode.
    pub fn cycle_direction(&self, id: ProducerId) -> Result<Direction, RegistryError> {
        self.configure(id, |producer, _| {
            let next = producer.direction().next();
            producer.set_direction(next);
            Ok(next)
        })
    }

    pub fn set_enabled(&self, id: ProducerId, enabled: bool) -> Result<(), RegistryError> {
        self.configure(id, |producer, _| {
            producer.set_enabled(enabled);
            Ok(())
        })
    }

    /// Flip the enabled flag. Returns the new state.
    pub fn toggle_enabled(&self, id: ProducerId) -> Result<bool, RegistryError> {
        self.configure(id, |producer, _| {
            let enabled = !producer.is_enabled();
            producer.set_enabled(enabled);
            Ok(enabled)
        })
    }

    /// Apply `f` to the owned producer under the store write lock; persist on
    /// success.
    fn configure<T>(
        &self,
        id: ProducerId,
        f: impl FnOnce(&mut Producer, &Settings) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let settings = self.settings.load();
        let result = {
            let mut store = self.store.write();
            let producer = store
                .producers
                .get_mut(&id)
                .ok_or(RegistryError::UnknownProducer(id))?;
            let value = f(producer, &settings)?;
            store.revision += 1;
            value
        };
        self.schedule_save();
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Scheduler support
    // -----------------------------------------------------------------------

    /// Read-only eligibility scan: enabled, interval elapsed at `now`, and
    /// loaded according to `host`. Returns the first `budget` matches in
    /// store order. `parallel` fans the filter out over the rayon pool; the
    /// result is identical either way.
    pub fn select_eligible(
        &self,
        now: u64,
        budget: usize,
        host: &dyn WorldHost,
        parallel: bool,
    ) -> Selection {
        let store = self.store.read();
        let eligible = |p: &Producer| p.should_spawn(now) && host.is_location_loaded(p.location());

        let mut ids: Vec<ProducerId> = if parallel {
            store
                .producers
                .par_values()
                .filter(|p| eligible(p))
                .map(Producer::id)
                .collect()
        } else {
            store
                .producers
                .values()
                .filter(|p| eligible(p))
                .map(Producer::id)
                .collect()
        };

        let eligible = ids.len();
        ids.truncate(budget);
        Selection { now, eligible, ids }
    }

    /// Roll and stamp each selected producer that is still eligible as of
    /// the selection time. A producer removed, disabled, or already stamped
    /// since the scan is dropped whole: no roll, no timestamp change.
    pub fn apply_selection(&self, selection: &Selection, now: u64, rng: &mut SimRng) -> Vec<Production> {
        let mut store = self.store.write();
        let mut produced = Vec::with_capacity(selection.ids.len());

        for id in &selection.ids {
            let Some(producer) = store.producers.get_mut(id) else {
                continue;
            };
            if !producer.should_spawn(selection.now) {
                continue;
            }
            let (spawn, item) = producer.roll(rng);
            producer.mark_produced(now);
            produced.push(Production {
                producer: *id,
                world: producer.location().world.clone(),
                spawn,
                item,
            });
        }
        produced
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn schedule_save(&self) {
        if let Some(sink) = &self.save_sink {
            sink.notify(self.revision());
        }
    }

    /// Read all three structures under one consistent set of read locks.
    pub(crate) fn with_structures<T>(
        &self,
        f: impl FnOnce(&IndexMap<ProducerId, Producer>, &SpatialIndex, &OwnerIndex) -> T,
    ) -> T {
        let store = self.store.read();
        let spatial = self.spatial.read();
        let owners = self.owners.read();
        f(&store.producers, &spatial, &owners)
    }
}

/// Remove `id` from all three structures. Caller holds every write lock.
fn remove_locked(
    store: &mut Store,
    spatial: &mut SpatialIndex,
    owners: &mut OwnerIndex,
    id: ProducerId,
) -> Option<Producer> {
    let producer = store.producers.shift_remove(&id)?;
    if let Err(e) = spatial.remove(producer.location(), id) {
        warn!(producer = %id, error = %e, "location index out of sync on removal");
    }
    if !owners.remove(producer.owner(), id) {
        warn!(producer = %id, owner = %producer.owner(), "owner index out of sync on removal");
    }
    store.revision += 1;
    Some(producer)
}
