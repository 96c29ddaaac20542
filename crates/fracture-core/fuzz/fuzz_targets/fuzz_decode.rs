#![no_main]
use fracture_core::config::Settings;
use fracture_core::serialize::decode_producers;
use fracture_core::test_utils::RecordingHost;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the loader; Err is fine.
    let host = RecordingHost::new();
    let _ = decode_producers(data, &host, &Settings::default(), 0);
});
