#![no_main]

use deadhand_core::Address;
use deadhand_ledger::graphql::parse_wallet_response;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary GraphQL bodies must decode to a wallet or an error.
    if let Ok(body) = std::str::from_utf8(data) {
        let wallet = Address::new([0x2c; 32]);
        if let Ok(Some(snapshot)) = parse_wallet_response(&wallet, body) {
            for entry in &snapshot.beneficiaries {
                let _ = snapshot.record_for(&entry.address);
            }
        }
    }
});
