//! Fuzz target for the policy document codec.
//!
//! Run with: cargo +nightly fuzz run fuzz_policy_decode
//!
//! Any document that decodes must encode, and the encoded form must decode
//! again without growing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::{decode_policy_document, encode_policy_document};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(policy) = decode_policy_document(&value) else {
        return;
    };
    let encoded = encode_policy_document(&policy).expect("decoded policy must encode");
    let decoded = decode_policy_document(&encoded).expect("encoded policy must decode");

    assert!(
        decoded.rules.len() <= policy.rules.len(),
        "reduction must not add rules"
    );
});
