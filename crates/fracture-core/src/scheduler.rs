//! The spawn scheduler: a host-driven cycle that selects eligible producers
//! under a per-cycle budget and hands their productions to the host.
//!
//! # Cycle
//!
//! Every `generator-tick-interval` host ticks:
//!
//! 1. **Select** -- scan the registry in creation order for producers that
//!    are enabled, loaded, and past their interval; keep the first
//!    `max-items-per-tick`.
//! 2. **Apply** -- under the store write lock, roll each selected producer
//!    and stamp its last-production time.
//! 3. **Emit** -- outside the lock, hand each production to the host.
//!
//! # Execution modes
//!
//! In [`ExecutionMode::Synchronous`] all three steps run inside the
//! [`Scheduler::tick`] call. In [`ExecutionMode::Deferred`] the select step
//! runs on the rayon pool and its result comes back over a channel; a later
//! `tick` applies and emits it. Both modes call the same
//! [`ProducerRegistry::select_eligible`] and
//! [`ProducerRegistry::apply_selection`], so they compute the same thing.
//!
//! Producers beyond the budget wait for a later cycle. Earlier-created
//! producers always win when the budget is exceeded.

use crate::config::Settings;
use crate::host::WorldHost;
use crate::id::{ProducerId, WorldId};
use crate::item::ItemTemplate;
use crate::producer::SpawnPoint;
use crate::registry::{ProducerRegistry, Selection};
use crate::rng::SimRng;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where the eligibility scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Scan, apply, and emit on the ticking context.
    Synchronous,
    /// Scan on a worker; apply and emit on the ticking context.
    Deferred,
}

impl ExecutionMode {
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.performance.async_processing {
            ExecutionMode::Deferred
        } else {
            ExecutionMode::Synchronous
        }
    }
}

/// One production handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub producer: ProducerId,
    pub world: WorldId,
    pub spawn: SpawnPoint,
    pub item: ItemTemplate,
}

/// Summary of one applied cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Producers eligible when the scan ran.
    pub eligible: usize,
    /// Producers kept after the budget.
    pub selected: usize,
    /// Productions emitted. Lower than `selected` when a deferred
    /// selection went stale before it was applied.
    pub produced: usize,
}

/// A selection computed off-context, tagged with the run it belongs to.
#[derive(Debug)]
struct DeferredSelection {
    generation: u64,
    selection: Selection,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives production cycles. Owned by the context that ticks it; that same
/// context is the only one that ever calls [`WorldHost::emit_production`].
pub struct Scheduler {
    registry: Arc<ProducerRegistry>,
    host: Arc<dyn WorldHost>,
    mode: ExecutionMode,
    /// Host ticks per cycle, fixed for one run.
    interval: u32,
    /// Host ticks since the current run started.
    ticks: u64,
    /// Bumped on every cancel/restart; selections from older runs are
    /// discarded on arrival.
    generation: u64,
    /// A deferred scan for the current generation has not come back yet.
    in_flight: bool,
    cancelled: bool,
    rng: SimRng,
    results_tx: Sender<DeferredSelection>,
    results_rx: Receiver<DeferredSelection>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.mode)
            .field("interval", &self.interval)
            .field("ticks", &self.ticks)
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl Scheduler {
    /// A scheduler configured from the registry's current settings, seeded
    /// from the system clock.
    pub fn new(registry: Arc<ProducerRegistry>, host: Arc<dyn WorldHost>) -> Self {
        let settings = registry.settings();
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        Self {
            registry,
            host,
            mode: ExecutionMode::from_settings(&settings),
            interval: settings.performance.generator_tick_interval.max(1),
            ticks: 0,
            generation: 0,
            in_flight: false,
            cancelled: false,
            rng: SimRng::from_entropy(),
            results_tx,
            results_rx,
        }
    }

    /// Replace the production RNG with a seeded one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = SimRng::new(seed);
    }

    /// Override the execution mode chosen from settings.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn has_pending_selection(&self) -> bool {
        self.in_flight
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Advance one host tick. Returns a report when a cycle's productions
    /// were applied during this tick. A no-op once cancelled.
    pub fn tick(&mut self) -> Option<CycleReport> {
        if self.cancelled {
            return None;
        }

        let mut report = self.drain_deferred();

        self.ticks += 1;
        if self.ticks % u64::from(self.interval) == 0 {
            match self.mode {
                ExecutionMode::Synchronous => {
                    if let Some(cycle) = self.run_cycle() {
                        report = Some(merge(report, cycle));
                    }
                }
                ExecutionMode::Deferred => self.start_deferred(),
            }
        }

        report
    }

    /// Run select-apply-emit right now on the calling context, regardless
    /// of mode and tick count. `None` once cancelled.
    pub fn run_cycle(&mut self) -> Option<CycleReport> {
        if self.cancelled {
            return None;
        }
        let settings = self.registry.settings();
        let now = self.registry.now();
        let selection = self.registry.select_eligible(
            now,
            settings.performance.max_items_per_tick,
            self.host.as_ref(),
            false,
        );
        Some(self.apply(selection))
    }

    /// Block up to `timeout` for the in-flight deferred selection and apply
    /// it. Returns `None` if nothing is in flight, the wait timed out, or
    /// the result turned out stale.
    pub fn wait_for_deferred(&mut self, timeout: Duration) -> Option<CycleReport> {
        if self.cancelled || !self.in_flight {
            return None;
        }
        let deadline = std::time::Instant::now() + timeout;
        while self.in_flight {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let result = self.results_rx.recv_timeout(remaining).ok()?;
            if let Some(report) = self.accept(result) {
                return Some(report);
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop for good. No cycle starts and no selection is applied after
    /// this returns; an in-flight scan's result is discarded when it lands.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.generation += 1;
        self.in_flight = false;
        debug!(generation = self.generation, "scheduler cancelled");
    }

    /// Cancel and start a fresh run from the registry's current settings.
    /// The tick counter restarts and any in-flight selection is discarded.
    pub fn restart(&mut self) {
        let settings = self.registry.settings();
        self.generation += 1;
        self.in_flight = false;
        self.cancelled = false;
        self.ticks = 0;
        self.mode = ExecutionMode::from_settings(&settings);
        self.interval = settings.performance.generator_tick_interval.max(1);
        debug!(
            generation = self.generation,
            mode = ?self.mode,
            interval = self.interval,
            "scheduler restarted"
        );
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn start_deferred(&mut self) {
        if self.in_flight {
            trace!("previous selection still in flight, skipping cycle");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let host = Arc::clone(&self.host);
        let tx = self.results_tx.clone();
        let generation = self.generation;
        let budget = registry.settings().performance.max_items_per_tick;
        let now = registry.now();

        self.in_flight = true;
        rayon::spawn(move || {
            let selection = registry.select_eligible(now, budget, host.as_ref(), true);
            // The scheduler may be gone by now; nothing to deliver to.
            let _ = tx.send(DeferredSelection {
                generation,
                selection,
            });
        });
    }

    /// Apply whatever deferred selections have arrived.
    fn drain_deferred(&mut self) -> Option<CycleReport> {
        let mut report = None;
        while let Ok(result) = self.results_rx.try_recv() {
            if let Some(cycle) = self.accept(result) {
                report = Some(merge(report, cycle));
            }
        }
        report
    }

    fn accept(&mut self, result: DeferredSelection) -> Option<CycleReport> {
        if result.generation != self.generation {
            debug!(
                stale = result.generation,
                current = self.generation,
                "discarding selection from a previous run"
            );
            return None;
        }
        self.in_flight = false;
        Some(self.apply(result.selection))
    }

    fn apply(&mut self, selection: Selection) -> CycleReport {
        if selection.eligible > selection.ids.len() {
            debug!(
                eligible = selection.eligible,
                budget = selection.ids.len(),
                "cycle budget exceeded, deferring the rest"
            );
        }

        let now = self.registry.now();
        let productions = self.registry.apply_selection(&selection, now, &mut self.rng);
        let produced = productions.len();
        for production in productions {
            self.host
                .emit_production(production.spawn, production.item, &production.world);
        }

        let report = CycleReport {
            eligible: selection.eligible,
            selected: selection.ids.len(),
            produced,
        };
        trace!(
            eligible = report.eligible,
            selected = report.selected,
            produced = report.produced,
            "production cycle applied"
        );
        report
    }
}

fn merge(acc: Option<CycleReport>, next: CycleReport) -> CycleReport {
    match acc {
        None => next,
        Some(prev) => CycleReport {
            eligible: prev.eligible + next.eligible,
            selected: prev.selected + next.selected,
            produced: prev.produced + next.produced,
        },
    }
}
