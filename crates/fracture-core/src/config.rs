//! Runtime settings and the hot-swappable handle that shares them.
//!
//! Keys are kebab-case to match the host's configuration file:
//!
//! ```toml
//! [performance]
//! max-generators-per-chunk = 10
//! max-generators-per-player = 50
//! generator-tick-interval = 20
//! async-processing = true
//! max-items-per-tick = 100
//!
//! [generators]
//! max-spawn-rate = 300
//! max-item-types = 10
//! default-spawn-rate = 60
//! ```

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Throughput caps, quotas, and scheduler knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PerformanceSettings {
    /// Producers allowed in one chunk.
    #[serde(deserialize_with = "clamped::count")]
    pub max_generators_per_chunk: usize,
    /// Producers one owner may hold.
    #[serde(deserialize_with = "clamped::count")]
    pub max_generators_per_player: usize,
    /// Host ticks between production cycles (20 host ticks = 1 second).
    #[serde(deserialize_with = "clamped::rate")]
    pub generator_tick_interval: u32,
    /// Run the eligibility scan on a worker and apply on the host context.
    pub async_processing: bool,
    /// Production budget per cycle.
    #[serde(deserialize_with = "clamped::count")]
    pub max_items_per_tick: usize,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_generators_per_chunk: 10,
            max_generators_per_player: 50,
            generator_tick_interval: 20,
            async_processing: true,
            max_items_per_tick: 100,
        }
    }
}

/// Per-producer configuration limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GeneratorSettings {
    /// Upper bound on spawn rate, in items per minute.
    #[serde(deserialize_with = "clamped::rate")]
    pub max_spawn_rate: u32,
    /// Upper bound on item templates per producer.
    #[serde(deserialize_with = "clamped::count")]
    pub max_item_types: usize,
    /// Spawn rate given to new producers.
    #[serde(deserialize_with = "clamped::rate")]
    pub default_spawn_rate: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_spawn_rate: 300,
            max_item_types: 10,
            default_spawn_rate: 60,
        }
    }
}

/// All runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    pub performance: PerformanceSettings,
    pub generators: GeneratorSettings,
}

impl Settings {
    /// Clamp out-of-range values to the nearest valid bound.
    ///
    /// Quotas of zero are kept (they legitimately forbid creation); values
    /// that would make the scheduler or rate math degenerate are raised to 1.
    pub fn sanitized(mut self) -> Self {
        let perf = &mut self.performance;
        perf.generator_tick_interval = perf.generator_tick_interval.max(1);

        let generators = &mut self.generators;
        generators.max_spawn_rate = generators.max_spawn_rate.max(1);
        generators.max_item_types = generators.max_item_types.max(1);
        generators.default_spawn_rate = generators
            .default_spawn_rate
            .clamp(1, generators.max_spawn_rate);
        self
    }

    /// Clamp a requested spawn rate into `[1, max-spawn-rate]`.
    pub fn clamp_spawn_rate(&self, rate: i64) -> u32 {
        rate.clamp(1, self.generators.max_spawn_rate.max(1) as i64) as u32
    }
}

/// Integer fields read as signed and clamped into range, so a stray negative
/// value lands on the nearest bound instead of rejecting the whole file.
mod clamped {
    use serde::{Deserialize, Deserializer};

    pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw.max(0)).unwrap_or(usize::MAX))
    }

    pub fn rate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(raw.clamp(0, i64::from(u32::MAX)) as u32)
    }
}

// ---------------------------------------------------------------------------
// SettingsHandle
// ---------------------------------------------------------------------------

/// Shared, hot-swappable settings. Readers get a consistent snapshot without
/// locking; `replace` publishes a new value atomically.
#[derive(Debug)]
pub struct SettingsHandle {
    current: ArcSwap<Settings>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings.sanitized()),
        }
    }

    /// Current settings snapshot.
    pub fn load(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Publish new settings. Takes effect for every subsequent read.
    pub fn replace(&self, settings: Settings) {
        self.current.store(Arc::new(settings.sanitized()));
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
