//! The producer entity: configuration, runtime timestamp, and the lazy
//! production roll (item pick + spawn point).

use crate::config::Settings;
use crate::id::{OwnerId, ProducerId};
use crate::item::{ItemTemplate, normalize_items};
use crate::rng::SimRng;
use crate::spatial::Location;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Milliseconds in one minute; spawn rates are items per minute.
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// Radius of the ring SIDES-mode items spawn on.
const SIDES_RADIUS: f64 = 1.2;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Where produced items appear relative to the producer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Centered, just above the block.
    #[default]
    Top,
    /// On a ring around the block at mid height.
    Sides,
    /// Scattered in a box around and above the block.
    Random,
}

impl Direction {
    pub fn all() -> [Direction; 3] {
        [Direction::Top, Direction::Sides, Direction::Random]
    }

    /// Next mode in display order, wrapping.
    pub fn next(self) -> Self {
        match self {
            Direction::Top => Direction::Sides,
            Direction::Sides => Direction::Random,
            Direction::Random => Direction::Top,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Top => "TOP",
            Direction::Sides => "SIDES",
            Direction::Random => "RANDOM",
        }
    }
}

// ---------------------------------------------------------------------------
// SpawnPoint
// ---------------------------------------------------------------------------

/// A world-space point (block coordinates plus fractional offset).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpawnPoint {
    /// Spawn point for `location` under `direction`, drawing any randomness
    /// from `rng`.
    pub fn compute(location: &Location, direction: Direction, rng: &mut SimRng) -> Self {
        let (dx, dy, dz) = match direction {
            Direction::Top => (0.5, 1.1, 0.5),
            Direction::Sides => {
                let angle = rng.next_f64() * TAU;
                (angle.cos() * SIDES_RADIUS, 0.5, angle.sin() * SIDES_RADIUS)
            }
            Direction::Random => {
                let dx = (rng.next_f64() - 0.5) * 2.0;
                let dy = rng.next_f64() + 0.5;
                let dz = (rng.next_f64() - 0.5) * 2.0;
                (dx, dy, dz)
            }
        };
        Self {
            x: location.pos.x as f64 + dx,
            y: location.pos.y as f64 + dy,
            z: location.pos.z as f64 + dz,
        }
    }
}

/// Minimum gap between productions at `rate` items per minute, floored to
/// whole milliseconds. A rate of 0 is treated as 1.
pub fn spawn_interval_ms(rate: u32) -> u64 {
    MILLIS_PER_MINUTE / rate.max(1) as u64
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// One placed producer.
///
/// Identity, location, and owner are fixed for the producer's lifetime.
/// The configuration fields are mutated only through the registry; values
/// handed out by the registry are snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Producer {
    id: ProducerId,
    location: Location,
    owner: OwnerId,
    items: Vec<ItemTemplate>,
    spawn_rate: u32,
    direction: Direction,
    enabled: bool,
    last_production: u64,
}

impl Producer {
    /// A producer with default configuration: one default item, the default
    /// spawn rate, TOP, enabled. The interval starts counting from `now`.
    pub fn new(id: ProducerId, location: Location, owner: OwnerId, settings: &Settings, now: u64) -> Self {
        Self {
            id,
            location,
            owner,
            items: vec![ItemTemplate::default()],
            spawn_rate: settings.clamp_spawn_rate(settings.generators.default_spawn_rate as i64),
            direction: Direction::Top,
            enabled: true,
            last_production: now,
        }
    }

    /// Rebuild a producer from persisted configuration. The item table is
    /// normalized and the rate clamped against `settings`.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ProducerId,
        location: Location,
        owner: OwnerId,
        items: Vec<ItemTemplate>,
        spawn_rate: u32,
        direction: Direction,
        enabled: bool,
        settings: &Settings,
        now: u64,
    ) -> Self {
        Self {
            id,
            location,
            owner,
            items: normalize_items(items, settings.generators.max_item_types),
            spawn_rate: settings.clamp_spawn_rate(spawn_rate as i64),
            direction,
            enabled,
            last_production: now,
        }
    }

    // -- Accessors --

    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn items(&self) -> &[ItemTemplate] {
        &self.items
    }

    pub fn spawn_rate(&self) -> u32 {
        self.spawn_rate
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_production(&self) -> u64 {
        self.last_production
    }

    /// Minimum gap between productions at the current rate.
    pub fn spawn_interval(&self) -> u64 {
        spawn_interval_ms(self.spawn_rate)
    }

    // -- Eligibility --

    /// Enabled and the interval has elapsed since the last production.
    /// Loaded-ness is the host's call and is checked by the scheduler.
    pub fn should_spawn(&self, now: u64) -> bool {
        self.enabled && now.saturating_sub(self.last_production) >= self.spawn_interval()
    }

    // -- Production --

    /// Roll one production: a uniformly random item from the table and a
    /// spawn point for the current direction.
    pub fn roll(&self, rng: &mut SimRng) -> (SpawnPoint, ItemTemplate) {
        let item = match self.items.len() {
            0 => ItemTemplate::default(),
            len => self.items[rng.next_index(len)].clone(),
        };
        let spawn = SpawnPoint::compute(&self.location, self.direction, rng);
        (spawn, item)
    }

    // -- Registry-only mutation --

    pub(crate) fn mark_produced(&mut self, now: u64) {
        self.last_production = now;
    }

    pub(crate) fn set_items(&mut self, items: Vec<ItemTemplate>, max_types: usize) {
        self.items = normalize_items(items, max_types);
    }

    pub(crate) fn items_mut(&mut self) -> &mut Vec<ItemTemplate> {
        &mut self.items
    }

    pub(crate) fn set_spawn_rate(&mut self, rate: u32) {
        self.spawn_rate = rate;
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{OwnerId, ProducerId};

    fn make_producer(now: u64) -> Producer {
        Producer::new(
            ProducerId::new(),
            Location::new("world", 10, 64, -5),
            OwnerId::from_u128(1),
            &Settings::default(),
            now,
        )
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    #[test]
    fn new_producer_has_default_config() {
        let p = make_producer(0);
        assert_eq!(p.items(), &[ItemTemplate::default()]);
        assert_eq!(p.spawn_rate(), 60);
        assert_eq!(p.direction(), Direction::Top);
        assert!(p.is_enabled());
    }

    #[test]
    fn restore_normalizes_and_clamps() {
        let p = Producer::restore(
            ProducerId::new(),
            Location::new("world", 0, 0, 0),
            OwnerId::from_u128(1),
            Vec::new(),
            10_000,
            Direction::Sides,
            false,
            &Settings::default(),
            0,
        );
        assert_eq!(p.items(), &[ItemTemplate::default()]);
        assert_eq!(p.spawn_rate(), 300);
        assert_eq!(p.direction(), Direction::Sides);
        assert!(!p.is_enabled());
    }

    // -----------------------------------------------------------------------
    // Interval math
    // -----------------------------------------------------------------------

    #[test]
    fn interval_floors_to_millis() {
        assert_eq!(spawn_interval_ms(60), 1_000);
        assert_eq!(spawn_interval_ms(300), 200);
        assert_eq!(spawn_interval_ms(1), 60_000);
        assert_eq!(spawn_interval_ms(7), 8_571);
        assert_eq!(spawn_interval_ms(0), 60_000);
    }

    #[test]
    fn should_spawn_waits_for_interval() {
        let p = make_producer(5_000);
        assert!(!p.should_spawn(5_000));
        assert!(!p.should_spawn(5_999));
        assert!(p.should_spawn(6_000));
        assert!(p.should_spawn(9_000));
    }

    #[test]
    fn disabled_never_spawns() {
        let mut p = make_producer(0);
        p.set_enabled(false);
        assert!(!p.should_spawn(1_000_000));
    }

    #[test]
    fn clock_behind_last_production_is_not_eligible() {
        let p = make_producer(10_000);
        assert!(!p.should_spawn(3_000));
    }

    // -----------------------------------------------------------------------
    // Direction
    // -----------------------------------------------------------------------

    #[test]
    fn direction_cycles_through_all() {
        let mut d = Direction::Top;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(d);
            d = d.next();
        }
        assert_eq!(seen, Direction::all());
        assert_eq!(d, Direction::Top);
    }

    // -----------------------------------------------------------------------
    // Spawn geometry
    // -----------------------------------------------------------------------

    #[test]
    fn top_spawn_is_centered_above() {
        let mut rng = SimRng::new(1);
        let loc = Location::new("world", 10, 64, -5);
        let p = SpawnPoint::compute(&loc, Direction::Top, &mut rng);
        assert_eq!(p.x, 10.5);
        assert!((p.y - 65.1).abs() < 1e-9);
        assert_eq!(p.z, -4.5);
    }

    #[test]
    fn sides_spawn_on_ring() {
        let mut rng = SimRng::new(2);
        let loc = Location::new("world", 0, 10, 0);
        for _ in 0..100 {
            let p = SpawnPoint::compute(&loc, Direction::Sides, &mut rng);
            let r = (p.x * p.x + p.z * p.z).sqrt();
            assert!((r - SIDES_RADIUS).abs() < 1e-9, "radius {r}");
            assert_eq!(p.y, 10.5);
        }
    }

    #[test]
    fn random_spawn_within_box() {
        let mut rng = SimRng::new(3);
        let loc = Location::new("world", 0, 10, 0);
        for _ in 0..100 {
            let p = SpawnPoint::compute(&loc, Direction::Random, &mut rng);
            assert!((-1.0..1.0).contains(&p.x));
            assert!((10.5..11.5).contains(&p.y));
            assert!((-1.0..1.0).contains(&p.z));
        }
    }

    #[test]
    fn roll_picks_from_table() {
        let mut p = make_producer(0);
        p.set_items(
            vec![ItemTemplate::new("iron_ingot", 1), ItemTemplate::new("gold_ingot", 2)],
            10,
        );
        let mut rng = SimRng::new(42);
        let mut kinds = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let (_, item) = p.roll(&mut rng);
            kinds.insert(item.kind);
        }
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn roll_is_reproducible_for_seed() {
        let mut p = make_producer(0);
        p.set_direction(Direction::Random);
        let a = p.roll(&mut SimRng::new(9));
        let b = p.roll(&mut SimRng::new(9));
        assert_eq!(a, b);
    }
}
