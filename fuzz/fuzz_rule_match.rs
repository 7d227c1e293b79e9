//! Fuzz target for rule selection.
//!
//! Run with: cargo +nightly fuzz run fuzz_rule_match
//!
//! Splits the input into a rule service and request levels and checks that
//! selection never panics and a service wildcard always matches.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::{Effect, Rule, get_match_rule};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let mut parts = s.split('/');
    let service = parts.next().unwrap_or_default();
    let resource = parts.next().unwrap_or("*");
    let action = parts.next().unwrap_or("*");
    let extra: Vec<&str> = parts.collect();

    let rules = vec![
        Rule::new("*", Effect::Allow),
        Rule::deny(service, resource, action),
    ];
    let matched = get_match_rule(&rules, service, resource, action, &extra);
    assert!(matched.is_some(), "wildcard rule must always match");
});
