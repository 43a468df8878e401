#![no_main]

use libfuzzer_sys::fuzz_target;
use shadec_ir::CollectingReporter;
use shadec_parser::{NoIncludes, ParseOptions, parse_library};

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Malformed sources must end in diagnostics, never a panic.
        let mut err = CollectingReporter::new();
        let _ = parse_library(source, "fuzz.csl", &NoIncludes, &mut err, &ParseOptions::default());
    }
});
