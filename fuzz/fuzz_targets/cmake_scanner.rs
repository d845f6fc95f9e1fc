#![no_main]

use libfuzzer_sys::fuzz_target;
use perfminer::buildmeta::cmake::parse_commands;
use perfminer::buildmeta::parse_manifest;

fuzz_target!(|data: &[u8]| {
    // Build scripts come from arbitrary repositories; scanning must not panic
    if let Ok(input) = std::str::from_utf8(data) {
        for cmd in parse_commands(input) {
            let _ = cmd.arguments();
        }
        let _ = parse_manifest(input);
    }
});
