#![no_main]

use deadhand_ledger::decode::BeneficiaryData;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = BeneficiaryData::from_bytes(data) {
        let bytes = decoded.to_bytes();
        assert_eq!(&bytes[..], &data[..bytes.len()]);
    }
});
