//! `GeneratorService`: wires settings, storage, the registry, the save
//! worker, and the scheduler together behind open / tick / reload /
//! shutdown.

use crate::save_worker::{SaveProgress, SaveWorker};
use crate::storage::{Storage, StorageError};
use fracture_core::config::{Settings, SettingsHandle};
use fracture_core::host::{Clock, WorldHost};
use fracture_core::id::{OwnerId, ProducerId};
use fracture_core::registry::{ProducerRegistry, SnapshotSource};
use fracture_core::scheduler::{CycleReport, Scheduler};
use fracture_core::serialize::{LoadReport, SerializeError};
use fracture_core::session::SessionTracker;
use fracture_core::spatial::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("failed to start save worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// The running generator subsystem.
pub struct GeneratorService {
    settings: Arc<SettingsHandle>,
    registry: Arc<ProducerRegistry>,
    scheduler: Scheduler,
    sessions: SessionTracker,
    storage: Arc<dyn Storage>,
    save_worker: SaveWorker,
    load_report: LoadReport,
    /// Scheduler cancelled and save worker stopped.
    closing: bool,
    /// Final state written.
    shut_down: bool,
}

impl std::fmt::Debug for GeneratorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorService")
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl GeneratorService {
    /// Load persisted producers from `storage` and start the save worker
    /// and scheduler.
    ///
    /// A save that cannot be decoded at all is copied aside with
    /// [`Storage::write_backup`] and the service starts empty. If that copy
    /// fails the service does not start, since the first mutation would
    /// overwrite the only remaining copy. Failing to read storage is an error
    /// for the same reason.
    pub fn open(
        settings: Settings,
        storage: Arc<dyn Storage>,
        host: Arc<dyn WorldHost>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let settings = Arc::new(SettingsHandle::new(settings));
        log_settings(&settings.load());

        let save_worker = SaveWorker::spawn(Arc::clone(&storage)).map_err(ServiceError::Spawn)?;
        let registry = Arc::new(
            ProducerRegistry::new(Arc::clone(&settings), clock)
                .with_save_sink(Arc::new(save_worker.queue())),
        );
        let source: Weak<dyn SnapshotSource> = Arc::downgrade(&registry) as Weak<ProducerRegistry>;
        save_worker.attach(source);

        let load_report = match storage.read()? {
            Some(bytes) => match registry.load_bytes(&bytes, host.as_ref()) {
                Ok(report) => report,
                Err(e) => {
                    storage.write_backup(&bytes)?;
                    error!(
                        error = %e,
                        bytes = bytes.len(),
                        "saved producers unreadable, backed up and starting empty"
                    );
                    LoadReport::default()
                }
            },
            None => {
                info!("no saved producers");
                LoadReport::default()
            }
        };

        let scheduler = Scheduler::new(Arc::clone(&registry), host);
        info!(
            producers = registry.len(),
            mode = ?scheduler.mode(),
            interval = scheduler.interval(),
            "generator service started"
        );

        Ok(Self {
            settings,
            registry,
            scheduler,
            sessions: SessionTracker::new(),
            storage,
            save_worker,
            load_report,
            closing: false,
            shut_down: false,
        })
    }

    /// Seed the production RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.scheduler.reseed(seed);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &Arc<ProducerRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// What the initial load found.
    pub fn load_report(&self) -> LoadReport {
        self.load_report
    }

    pub fn save_progress(&self) -> SaveProgress {
        self.save_worker.progress()
    }

    /// Block until the background writer has written the registry's
    /// current revision.
    pub fn wait_for_save(&self, timeout: Duration) -> bool {
        self.save_worker
            .wait_for_revision(self.registry.revision(), timeout)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // -----------------------------------------------------------------------
    // Host events
    // -----------------------------------------------------------------------

    /// One host tick.
    pub fn tick(&mut self) -> Option<CycleReport> {
        self.scheduler.tick()
    }

    /// Wait for an in-flight deferred selection and apply it.
    pub fn wait_for_deferred(&mut self, timeout: Duration) -> Option<CycleReport> {
        self.scheduler.wait_for_deferred(timeout)
    }

    /// Remove a producer and close any panels showing it. Returns the
    /// actors whose panel was closed, or `None` if the id was unknown.
    pub fn remove_producer(&self, id: ProducerId) -> Option<Vec<OwnerId>> {
        if !self.registry.remove(id) {
            return None;
        }
        Some(self.sessions.forget_producer(id))
    }

    /// The block at `location` is gone: drop whatever producer stood there.
    pub fn block_removed(&self, location: &Location) -> Option<ProducerId> {
        let id = self.registry.remove_at(location)?;
        self.sessions.forget_producer(id);
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Swap in new settings and restart the scheduler under them.
    /// Persisted state is untouched.
    pub fn reload(&mut self, settings: Settings) {
        if self.closing {
            warn!("reload after shutdown ignored");
            return;
        }
        self.settings.replace(settings);
        self.scheduler.restart();
        log_settings(&self.settings.load());
        info!(
            mode = ?self.scheduler.mode(),
            interval = self.scheduler.interval(),
            "generator service reloaded"
        );
    }

    /// Cancel the scheduler, drain the save worker, and write the final
    /// state synchronously. Once the final write succeeds further calls are
    /// no-ops; after a failed write the next call (or drop) tries again.
    pub fn shutdown(&mut self) -> Result<(), ServiceError> {
        if self.shut_down {
            return Ok(());
        }
        if !self.closing {
            self.closing = true;
            self.scheduler.cancel();
            self.save_worker.stop();
        }

        let snapshot = self.registry.snapshot();
        let bytes = fracture_core::serialize::encode_snapshot(&snapshot)?;
        self.storage.write(&bytes)?;
        self.shut_down = true;
        info!(
            producers = snapshot.producers.len(),
            revision = snapshot.revision,
            "generator service shut down"
        );
        Ok(())
    }
}

impl Drop for GeneratorService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "final save failed");
        }
    }
}

fn log_settings(settings: &Settings) {
    let perf = &settings.performance;
    let generators = &settings.generators;
    info!(
        max_per_chunk = perf.max_generators_per_chunk,
        max_per_player = perf.max_generators_per_player,
        tick_interval = perf.generator_tick_interval,
        async_processing = perf.async_processing,
        max_items_per_tick = perf.max_items_per_tick,
        max_spawn_rate = generators.max_spawn_rate,
        max_item_types = generators.max_item_types,
        "effective settings"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use fracture_core::serialize::read_save_header;
    use fracture_core::test_utils::*;

    const WAIT: Duration = Duration::from_secs(10);

    fn sync_settings() -> Settings {
        let mut s = Settings::default();
        s.performance.async_processing = false;
        s.performance.generator_tick_interval = 1;
        s
    }

    fn open(
        settings: Settings,
        storage: Arc<MemoryStorage>,
    ) -> (GeneratorService, Arc<RecordingHost>, Arc<fracture_core::host::ManualClock>) {
        let host = Arc::new(RecordingHost::new());
        let clock = manual_clock(0);
        let service = GeneratorService::open(settings, storage, host.clone(), clock.clone())
            .unwrap()
            .with_seed(11);
        (service, host, clock)
    }

    // -----------------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------------

    #[test]
    fn open_empty_storage() {
        let (service, _, _) = open(sync_settings(), Arc::new(MemoryStorage::new()));
        assert!(service.registry().is_empty());
        assert_eq!(service.load_report(), LoadReport::default());
    }

    #[test]
    fn unreadable_save_backed_up_before_starting_empty() {
        let garbage = b"not a producer save".to_vec();
        let storage = Arc::new(MemoryStorage::with_data(garbage.clone()));
        let (mut service, _, _) = open(sync_settings(), storage.clone());
        assert!(service.registry().is_empty());
        assert_eq!(storage.backups(), vec![garbage.clone()]);

        service.registry().create(loc(0, 64, 0), alice()).unwrap();
        service.shutdown().unwrap();
        assert_ne!(storage.contents(), Some(garbage.clone()));
        assert_eq!(storage.backups(), vec![garbage]);
    }

    #[test]
    fn open_refuses_when_unreadable_save_cannot_be_backed_up() {
        let garbage = vec![9, 9, 9];
        let storage = Arc::new(MemoryStorage::with_data(garbage.clone()));
        storage.set_failing(true);

        let result = GeneratorService::open(
            sync_settings(),
            storage.clone(),
            Arc::new(RecordingHost::new()),
            manual_clock(0),
        );
        assert!(matches!(result, Err(ServiceError::Storage(_))));
        drop(result);
        assert_eq!(storage.contents(), Some(garbage));
        assert!(storage.backups().is_empty());
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn mutations_reach_storage_in_background() {
        let storage = Arc::new(MemoryStorage::new());
        let (service, _, _) = open(sync_settings(), storage.clone());
        let id = service.registry().create(loc(0, 64, 0), alice()).unwrap();
        service.registry().set_spawn_rate(id, 200).unwrap();

        assert!(service.wait_for_save(WAIT));
        assert!(storage.contents().is_some());
    }

    #[test]
    fn shutdown_flushes_final_state() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut service, _, _) = open(sync_settings(), storage.clone());
        for i in 0..5 {
            service.registry().create(loc(i, 64, 0), alice()).unwrap();
        }
        service.shutdown().unwrap();
        assert!(service.is_shut_down());

        let (reopened, _, _) = open(sync_settings(), storage);
        assert_eq!(reopened.registry().len(), 5);
    }

    #[test]
    fn failed_final_save_is_retried() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_failing(true);
        let (mut service, _, _) = open(sync_settings(), storage.clone());
        service.registry().create(loc(0, 64, 0), alice()).unwrap();
        service.registry().create(loc(5, 64, 0), alice()).unwrap();

        assert!(service.shutdown().is_err());
        assert!(!service.is_shut_down());
        assert_eq!(storage.contents(), None);

        storage.set_failing(false);
        service.shutdown().unwrap();
        assert!(service.is_shut_down());
        let header = read_save_header(&storage.contents().unwrap()).unwrap();
        assert_eq!(header.revision, service.registry().revision());

        let (reopened, _, _) = open(sync_settings(), storage);
        assert_eq!(reopened.registry().len(), 2);
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_cycles() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut service, host, clock) = open(sync_settings(), storage);
        service.registry().create(loc(0, 64, 0), alice()).unwrap();
        service.shutdown().unwrap();
        service.shutdown().unwrap();

        clock.advance(10_000);
        assert!(service.tick().is_none());
        assert!(host.emitted().is_empty());
    }

    // -----------------------------------------------------------------------
    // Ticking and reload
    // -----------------------------------------------------------------------

    #[test]
    fn tick_produces_items() {
        let (mut service, host, clock) = open(sync_settings(), Arc::new(MemoryStorage::new()));
        service.registry().create(loc(0, 64, 0), alice()).unwrap();
        clock.advance(1_000);
        assert_eq!(service.tick().map(|r| r.produced), Some(1));
        assert_eq!(host.emitted().len(), 1);
    }

    #[test]
    fn reload_applies_new_settings_without_touching_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut service, _, _) = open(sync_settings(), storage.clone());
        service.registry().create(loc(0, 64, 0), alice()).unwrap();
        assert!(service.wait_for_save(WAIT));
        let writes = storage.writes();

        let mut next = sync_settings();
        next.performance.generator_tick_interval = 40;
        next.performance.max_generators_per_player = 1;
        service.reload(next);

        assert_eq!(service.scheduler().interval(), 40);
        assert_eq!(storage.writes(), writes);
        assert!(service.registry().create(loc(50, 64, 0), alice()).is_err());
    }

    #[test]
    fn removing_producer_closes_panels() {
        let (service, _, _) = open(sync_settings(), Arc::new(MemoryStorage::new()));
        let id = service.registry().create(loc(0, 64, 0), alice()).unwrap();
        service.sessions().open_panel(bob(), id);

        assert_eq!(service.remove_producer(id), Some(vec![bob()]));
        assert_eq!(service.sessions().open_panel_of(bob()), None);
        assert_eq!(service.remove_producer(id), None);
    }

    #[test]
    fn block_removal_drops_producer() {
        let (service, _, _) = open(sync_settings(), Arc::new(MemoryStorage::new()));
        let id = service.registry().create(loc(4, 64, 4), alice()).unwrap();
        assert_eq!(service.block_removed(&loc(4, 64, 4)), Some(id));
        assert!(service.registry().get(id).is_none());
    }
}
