#![no_main]

use deadhand_core::{Address, InactivityWindow};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing caller-supplied strings must never panic, and anything that
    // parses must round-trip through its canonical form.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(address) = s.parse::<Address>() {
            assert_eq!(address.to_string().parse::<Address>(), Ok(address));
        }
        let _ = InactivityWindow::parse(data.len() as i64, s);
    }
});
