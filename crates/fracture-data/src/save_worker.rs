//! Background persistence: the registry announces new revisions, a
//! dedicated thread pulls a snapshot and writes it.
//!
//! Announcements travel over a single-slot channel. While a write is in
//! progress further announcements collapse into the one waiting in the slot,
//! and the next pull picks up whatever the registry holds by then, so a
//! burst of mutations costs one snapshot copy per write, not one per
//! mutation. A failed write leaves the worker dirty; the next announcement
//! (or shutdown) retries it.

use crate::storage::Storage;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use fracture_core::registry::{SaveSink, SnapshotSource};
use fracture_core::serialize::encode_snapshot;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Debug)]
enum SaveCommand {
    Save(u64),
    Stop,
}

/// Progress counters shared between the worker and its observers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveProgress {
    /// Highest revision durably written.
    pub written_revision: u64,
    /// Successful writes.
    pub writes: u64,
    /// Failed attempts (encode or storage).
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Shared {
    progress: Mutex<SaveProgress>,
    changed: Condvar,
    source: Mutex<Option<Weak<dyn SnapshotSource>>>,
}

// ---------------------------------------------------------------------------
// SaveQueue
// ---------------------------------------------------------------------------

/// The registry-facing end: a [`SaveSink`] that never blocks.
#[derive(Debug, Clone)]
pub struct SaveQueue {
    tx: Sender<SaveCommand>,
}

impl SaveSink for SaveQueue {
    fn notify(&self, revision: u64) {
        match self.tx.try_send(SaveCommand::Save(revision)) {
            // A pending announcement already covers this revision.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!(revision, "save worker stopped, change not queued");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SaveWorker
// ---------------------------------------------------------------------------

/// Owns the writer thread.
#[derive(Debug)]
pub struct SaveWorker {
    queue: SaveQueue,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl SaveWorker {
    /// Start the writer thread against `storage`. Nothing is written until a
    /// source is attached.
    pub fn spawn(storage: Arc<dyn Storage>) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("fracture-save".into())
            .spawn(move || run(rx, storage, thread_shared))?;

        Ok(Self {
            queue: SaveQueue { tx },
            shared,
            handle: Some(handle),
        })
    }

    /// Where to pull snapshots from. Held weakly so the worker never keeps
    /// the registry alive.
    pub fn attach(&self, source: Weak<dyn SnapshotSource>) {
        *self.shared.source.lock() = Some(source);
    }

    /// A sink to hand to the registry.
    pub fn queue(&self) -> SaveQueue {
        self.queue.clone()
    }

    pub fn progress(&self) -> SaveProgress {
        *self.shared.progress.lock()
    }

    /// Block until `revision` (or later) is written or `timeout` passes.
    pub fn wait_for_revision(&self, revision: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        while progress.written_revision < revision {
            if self
                .shared
                .changed
                .wait_until(&mut progress, deadline)
                .timed_out()
            {
                return progress.written_revision >= revision;
            }
        }
        true
    }

    /// Drain the queue, make a last attempt at any unwritten change, and
    /// join the thread. Announcements after this are dropped.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.queue.tx.send(SaveCommand::Stop);
        if handle.join().is_err() {
            error!("save worker panicked");
        }
    }
}

impl Drop for SaveWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn run(rx: Receiver<SaveCommand>, storage: Arc<dyn Storage>, shared: Arc<Shared>) {
    let mut dirty = false;

    loop {
        let Ok(first) = rx.recv() else {
            break;
        };
        let mut stop = false;
        for command in std::iter::once(first).chain(rx.try_iter()) {
            match command {
                SaveCommand::Save(revision) => {
                    dirty |= revision > shared.progress.lock().written_revision;
                }
                SaveCommand::Stop => stop = true,
            }
        }

        if dirty {
            dirty = !flush(&*storage, &shared);
        }
        if stop {
            break;
        }
    }

    if dirty {
        warn!("save worker stopping with unwritten changes");
    }
}

/// Pull the current snapshot and write it. Returns `false` when the write
/// failed and must be retried.
fn flush(storage: &dyn Storage, shared: &Shared) -> bool {
    let source = shared.source.lock().as_ref().and_then(|weak| weak.upgrade());
    let Some(source) = source else {
        debug!("no snapshot source attached, nothing to save");
        return true;
    };

    let snapshot = source.snapshot();
    if snapshot.revision <= shared.progress.lock().written_revision {
        return true;
    }

    let result = encode_snapshot(&snapshot)
        .map_err(|e| e.to_string())
        .and_then(|bytes| storage.write(&bytes).map_err(|e| e.to_string()));

    let mut progress = shared.progress.lock();
    let written = match result {
        Ok(()) => {
            progress.written_revision = progress.written_revision.max(snapshot.revision);
            progress.writes += 1;
            debug!(
                revision = snapshot.revision,
                producers = snapshot.producers.len(),
                "producers saved"
            );
            true
        }
        Err(e) => {
            progress.failures += 1;
            error!(revision = snapshot.revision, error = %e, "failed to save producers");
            false
        }
    };
    shared.changed.notify_all();
    written
}
