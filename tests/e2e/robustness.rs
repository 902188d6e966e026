//! Malformed input must be rejected, never panic.
//!
//! Covers the boundaries where untrusted data enters: address strings from
//! API callers, and ledger payloads from the GraphQL endpoint.

use deadhand_core::{Address, InactivityWindow, ValidationError};
use deadhand_ledger::decode::{
    decode_beneficiary, decode_wallet, encode_beneficiary, BcsNode, BeneficiaryData,
    DynamicFieldNode, MoveValue,
};
use deadhand_ledger::graphql::parse_wallet_response;
use rand::{Rng, RngCore};
use serde_json::json;

const WALLET: Address = Address::new([0x2c; 32]);

fn random_string(rng: &mut impl Rng, max_len: usize) -> String {
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| rng.gen::<char>()).collect()
}

// ============================================================================
// 1. Caller-supplied fields
// ============================================================================

#[test]
fn test_random_address_strings_never_panic() {
    let mut rng = rand::thread_rng();
    for _ in 0..2_000 {
        let s = random_string(&mut rng, 80);
        let _ = s.parse::<Address>();
        let _ = ValidationError::parse_address("ownerAddress", &s);
    }
}

#[test]
fn test_hex_like_addresses() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let len = rng.gen_range(1..=70);
        let digits: String = (0..len)
            .map(|_| b"0123456789abcdefABCDEFxg"[rng.gen_range(0..24)] as char)
            .collect();
        let input = format!("0x{}", digits);
        if let Ok(address) = input.parse::<Address>() {
            // Whatever parses must survive its own rendering
            assert_eq!(address.to_string().parse::<Address>().unwrap(), address);
        }
    }
}

#[test]
fn test_inactivity_window_extremes() {
    for duration in [i64::MIN, -1, 0] {
        assert_eq!(
            InactivityWindow::parse(duration, "days"),
            Err(ValidationError::NonPositiveDuration)
        );
    }
    assert!(InactivityWindow::parse(i64::MAX, "days").is_err());

    let widest = InactivityWindow::parse(i64::from(u32::MAX), "days").unwrap();
    assert!(widest.as_millis() > 0);
    for unit in ["", "DAYS", "day", "weeks", "fortnights", "minutes "] {
        assert!(InactivityWindow::parse(1, unit).is_err(), "{unit:?} accepted");
    }
}

// ============================================================================
// 2. Ledger payloads
// ============================================================================

#[test]
fn test_random_graphql_bodies_never_panic() {
    let mut rng = rand::thread_rng();
    for _ in 0..1_000 {
        let body = random_string(&mut rng, 200);
        assert!(parse_wallet_response(&WALLET, &body).is_err());
    }

    for body in [
        "{}",
        "null",
        r#"{"data": {}}"#,
        r#"{"data": {"object": {}}}"#,
        r#"{"data": {"object": {"asMoveObject": {}}}}"#,
        r#"{"data": {"object": {"asMoveObject": {"contents": {"data": {"Number": "1"}}, "dynamicFields": {"nodes": []}}}}}"#,
        r#"{"errors": []}"#,
    ] {
        let _ = parse_wallet_response(&WALLET, body);
    }
}

#[test]
fn test_random_beneficiary_payloads_never_panic() {
    let mut rng = rand::thread_rng();
    for _ in 0..1_000 {
        let mut bytes = vec![0u8; rng.gen_range(0..48)];
        rng.fill_bytes(&mut bytes);
        let _ = BeneficiaryData::from_bytes(&bytes);

        let node = DynamicFieldNode {
            name: BcsNode {
                bcs: random_string(&mut rng, 60),
            },
            value: Some(BcsNode {
                bcs: random_string(&mut rng, 60),
            }),
        };
        assert!(decode_beneficiary(&node).is_err());
    }
}

#[test]
fn test_out_of_range_ledger_numbers_are_errors() {
    let contents: MoveValue = serde_json::from_value(json!({
        "Struct": [
            {"name": "owner", "value": {"Address": vec![1u8; 32]}},
            {"name": "coin", "value": {"Struct": [
                {"name": "value", "value": {"Number": "1"}}
            ]}}
        ]
    }))
    .unwrap();

    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let data = BeneficiaryData {
            last_checkin_ms: rng.gen(),
            threshold_ms: rng.gen(),
            allocation: rng.gen(),
        };
        let field = encode_beneficiary(&Address::new([2; 32]), &data);
        // Either step may reject the entry
        if let Ok(wallet) = decode_wallet(WALLET, &contents, &[field]) {
            assert!(wallet.record_for(&Address::new([2; 32])).is_some());
        }
    }

    let zero_window = BeneficiaryData {
        last_checkin_ms: 1_000,
        threshold_ms: 0,
        allocation: 5,
    };
    let field = encode_beneficiary(&Address::new([2; 32]), &zero_window);
    let wallet = decode_wallet(WALLET, &contents, &[field]).unwrap();
    assert!(matches!(
        wallet.record_for(&Address::new([2; 32])),
        Some(Err(ValidationError::NonPositiveDuration))
    ));
}
