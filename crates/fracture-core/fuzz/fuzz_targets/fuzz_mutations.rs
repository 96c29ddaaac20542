#![no_main]
use arbitrary::Arbitrary;
use fracture_core::config::Settings;
use fracture_core::id::ProducerId;
use fracture_core::item::ItemTemplate;
use fracture_core::rng::SimRng;
use fracture_core::test_utils::*;
use libfuzzer_sys::fuzz_target;

/// A structured registry operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Create { x: i8, z: i8, owner: u8 },
    Remove { index: u8 },
    RemoveAt { x: i8, z: i8 },
    AddItem { index: u8, amount: u8 },
    RemoveItem { index: u8, item: u8 },
    AdjustRate { index: u8, delta: i16 },
    CycleDirection { index: u8 },
    Toggle { index: u8 },
    Advance { millis: u16 },
    Cycle { budget: u8 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fn pick(ids: &[ProducerId], index: u8) -> Option<ProducerId> {
    (!ids.is_empty()).then(|| ids[index as usize % ids.len()])
}

fuzz_target!(|input: FuzzInput| {
    let mut settings = Settings::default();
    settings.performance.max_generators_per_chunk = 4;
    settings.performance.max_generators_per_player = 8;
    let clock = manual_clock(0);
    let registry = make_registry(settings, clock.clone());
    let host = RecordingHost::new();
    let mut rng = SimRng::new(0);
    let mut ids: Vec<ProducerId> = Vec::new();

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for op in &input.ops[..max_ops] {
        match *op {
            FuzzOp::Create { x, z, owner: o } => {
                if let Ok(id) = registry.create(loc(x.into(), 64, z.into()), owner(o.into())) {
                    ids.push(id);
                }
            }
            FuzzOp::Remove { index } => {
                if let Some(id) = pick(&ids, index) {
                    registry.remove(id);
                }
            }
            FuzzOp::RemoveAt { x, z } => {
                registry.remove_at(&loc(x.into(), 64, z.into()));
            }
            FuzzOp::AddItem { index, amount } => {
                if let Some(id) = pick(&ids, index) {
                    let _ = registry.add_item(id, ItemTemplate::new("fuzz_item", amount.into()));
                }
            }
            FuzzOp::RemoveItem { index, item } => {
                if let Some(id) = pick(&ids, index) {
                    let _ = registry.remove_item(id, item.into());
                }
            }
            FuzzOp::AdjustRate { index, delta } => {
                if let Some(id) = pick(&ids, index) {
                    let _ = registry.adjust_spawn_rate(id, delta.into());
                }
            }
            FuzzOp::CycleDirection { index } => {
                if let Some(id) = pick(&ids, index) {
                    let _ = registry.cycle_direction(id);
                }
            }
            FuzzOp::Toggle { index } => {
                if let Some(id) = pick(&ids, index) {
                    let _ = registry.toggle_enabled(id);
                }
            }
            FuzzOp::Advance { millis } => clock.advance(millis.into()),
            FuzzOp::Cycle { budget } => {
                let selection =
                    registry.select_eligible(registry.now(), budget.into(), &host, false);
                registry.apply_selection(&selection, registry.now(), &mut rng);
            }
        }
        assert!(registry.validate_indices().is_empty());
    }
});
