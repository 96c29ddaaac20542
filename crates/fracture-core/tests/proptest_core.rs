//! Property-based tests for the producer registry and scheduler.
//!
//! Uses proptest to generate random operation sequences against a registry,
//! then verify the structural invariants hold.

use fracture_core::config::Settings;
use fracture_core::id::{OwnerId, ProducerId};
use fracture_core::producer::{Direction, Producer, spawn_interval_ms};
use fracture_core::registry::Rejection;
use fracture_core::scheduler::Scheduler;
use fracture_core::spatial::Location;
use fracture_core::test_utils::*;
use fracture_core::validation::diff_producers;
use proptest::prelude::*;
use std::sync::Arc;

// ===========================================================================
// Generators
// ===========================================================================

/// Registry operations. Coordinates are kept in a small box so collisions
/// and chunk quotas actually get hit.
#[derive(Debug, Clone)]
enum RegistryOp {
    Create { x: i32, z: i32, owner: u128 },
    Remove(usize),
    RemoveAt { x: i32, z: i32 },
    SetRate(usize, i64),
    Toggle(usize),
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<RegistryOp>> {
    proptest::collection::vec(
        prop_oneof![
            4 => (-40..40i32, -40..40i32, 0..4u128)
                .prop_map(|(x, z, owner)| RegistryOp::Create { x, z, owner }),
            1 => (0..64usize).prop_map(RegistryOp::Remove),
            1 => (-40..40i32, -40..40i32).prop_map(|(x, z)| RegistryOp::RemoveAt { x, z }),
            1 => (0..64usize, -500..500i64).prop_map(|(i, r)| RegistryOp::SetRate(i, r)),
            1 => (0..64usize).prop_map(RegistryOp::Toggle),
        ],
        1..=max_ops,
    )
}

fn tight_settings(per_chunk: usize, per_owner: usize) -> Settings {
    let mut s = Settings::default();
    s.performance.max_generators_per_chunk = per_chunk;
    s.performance.max_generators_per_player = per_owner;
    s
}

fn at(x: i32, z: i32) -> Location {
    loc(x, 64, z)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of operations the indices agree with the store,
    /// and no owner or chunk exceeds its quota.
    #[test]
    fn indices_and_quotas_hold(ops in arb_ops(120)) {
        let registry = make_registry(tight_settings(3, 5), manual_clock(0));
        let mut ids: Vec<ProducerId> = Vec::new();

        for op in ops {
            match op {
                RegistryOp::Create { x, z, owner: o } => {
                    if let Ok(id) = registry.create(at(x, z), owner(o)) {
                        ids.push(id);
                    }
                }
                RegistryOp::Remove(i) => {
                    if !ids.is_empty() {
                        let id = ids.remove(i % ids.len());
                        prop_assert!(registry.remove(id));
                        prop_assert!(!registry.remove(id));
                    }
                }
                RegistryOp::RemoveAt { x, z } => {
                    if let Some(id) = registry.remove_at(&at(x, z)) {
                        ids.retain(|&kept| kept != id);
                    }
                }
                RegistryOp::SetRate(i, rate) => {
                    if !ids.is_empty() {
                        let effective = registry.set_spawn_rate(ids[i % ids.len()], rate).unwrap();
                        prop_assert!((1..=300).contains(&effective));
                    }
                }
                RegistryOp::Toggle(i) => {
                    if !ids.is_empty() {
                        registry.toggle_enabled(ids[i % ids.len()]).unwrap();
                    }
                }
            }

            prop_assert!(registry.validate_indices().is_empty());
        }

        prop_assert_eq!(registry.len(), ids.len());
        for o in 0..4u128 {
            prop_assert!(registry.list_by_owner(owner(o)).len() <= 5);
        }
        for producer in registry.list_all() {
            prop_assert!(registry.count_in_region(producer.location()) <= 3);
        }
    }

    /// A successful create is immediately findable and blocks a second
    /// create at the same location.
    #[test]
    fn create_then_occupied(x in -1000..1000i32, y in -64..320i32, z in -1000..1000i32, o in 0..10u128) {
        let registry = default_registry();
        let location = loc(x, y, z);
        let id = registry.create(location.clone(), owner(o)).unwrap();
        prop_assert_eq!(registry.find_at(&location), Some(id));
        prop_assert_eq!(
            registry.create(location.clone(), owner(o + 1)),
            Err(Rejection::OccupiedLocation(location))
        );
    }

    /// Save then load yields the same producer set.
    #[test]
    fn save_load_round_trip(ops in arb_ops(60)) {
        let registry = default_registry();
        let mut ids = Vec::new();
        for op in ops {
            match op {
                RegistryOp::Create { x, z, owner: o } => {
                    if let Ok(id) = registry.create(at(x, z), owner(o)) {
                        ids.push(id);
                    }
                }
                RegistryOp::SetRate(i, rate) if !ids.is_empty() => {
                    registry.set_spawn_rate(ids[i % ids.len()], rate).unwrap();
                }
                RegistryOp::Toggle(i) if !ids.is_empty() => {
                    registry.cycle_direction(ids[i % ids.len()]).unwrap();
                }
                _ => {}
            }
        }

        let bytes = registry.save_bytes().unwrap();
        let restored = default_registry();
        restored.load_bytes(&bytes, &RecordingHost::new()).unwrap();

        let diffs = diff_producers(&registry.list_all(), &restored.list_all());
        prop_assert!(diffs.is_empty(), "diffs: {:?}", diffs);
    }

    /// A producer is eligible exactly when a full interval has elapsed.
    #[test]
    fn eligibility_matches_interval(rate in 1..=300u32, start in 0..1_000_000u64, elapsed in 0..120_000u64) {
        let producer = Producer::restore(
            ProducerId::new(),
            loc(0, 0, 0),
            OwnerId::from_u128(1),
            Vec::new(),
            rate,
            Direction::Top,
            true,
            &Settings::default(),
            start,
        );

        let interval = spawn_interval_ms(rate);
        prop_assert_eq!(producer.should_spawn(start + elapsed), elapsed >= interval);
    }

    /// Every cycle produces `min(eligible, budget)` items.
    #[test]
    fn cycles_respect_budget(n in 0..30i32, budget in 0..10usize, cycles in 1..8usize) {
        let mut settings = Settings::default();
        settings.performance.max_items_per_tick = budget;
        settings.performance.generator_tick_interval = 1;
        settings.performance.async_processing = false;
        let clock = manual_clock(0);
        let registry = Arc::new(make_registry(settings, clock.clone()));
        let host = Arc::new(RecordingHost::new());
        let mut scheduler = Scheduler::new(registry.clone(), host.clone()).with_seed(1);

        for i in 0..n {
            registry.create(loc(i * 16, 64, 0), owner(u128::from(i as u32 % 3))).unwrap();
        }

        let mut total = 0;
        for _ in 0..cycles {
            clock.advance(1_000);
            let report = scheduler.tick().unwrap();
            prop_assert_eq!(report.selected, report.eligible.min(budget));
            prop_assert_eq!(report.produced, report.selected);
            total += report.produced;
        }
        prop_assert_eq!(host.emitted().len(), total);
        prop_assert!(total <= budget * cycles);
    }
}
