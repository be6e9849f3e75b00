#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Preset name parsing should never panic on any input
    let _ = data.parse::<cuerdas_audio::Preset>();
});
