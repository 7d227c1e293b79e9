//! Property tests for the rule matcher, the tree codec and the tag-set algebra.

use proptest::prelude::*;
use proptest::sample::select;

use warden_core::tree::{CANONICAL_ACTIONS, PolicyTree, decode_rules, encode_rules};
use warden_core::{
    Effect, PolicyResult, Rule, RuleSet, Tag, TagSet, TagSetList, get_match_rule,
};

const SERVICES: [&str; 2] = ["compute", "image"];
const RESOURCES: [&str; 2] = ["servers", "disks"];

fn arb_effect() -> impl Strategy<Value = Effect> {
    prop_oneof![Just(Effect::Allow), Just(Effect::Deny)]
}

fn arb_token() -> impl Strategy<Value = String> {
    select(vec!["", "*", "a", "b"]).prop_map(str::to_string)
}

fn arb_rule() -> impl Strategy<Value = Rule> {
    (
        arb_token(),
        arb_token(),
        arb_token(),
        proptest::collection::vec(arb_token(), 0..3),
        arb_effect(),
    )
        .prop_map(|(s, r, a, extra, e)| {
            Rule::new(&s, e)
                .with_resource(&r)
                .with_action(&a)
                .with_extra(extra)
        })
}

/// Rules whose wildcards are only trailing levels, over the closed action set.
fn arb_hierarchical_rule() -> impl Strategy<Value = Rule> {
    (
        0usize..=3,
        select(SERVICES.to_vec()),
        select(RESOURCES.to_vec()),
        select(CANONICAL_ACTIONS.to_vec()),
        arb_effect(),
    )
        .prop_map(|(depth, s, r, a, e)| {
            let level = |i: usize, v: &'static str| if i < depth { v } else { "*" };
            Rule::new(level(0, s), e)
                .with_resource(level(1, r))
                .with_action(level(2, a))
        })
}

fn arb_tag(values: Vec<&'static str>) -> impl Strategy<Value = Tag> {
    (select(vec!["a", "b", "c"]), select(values)).prop_map(|(k, v)| Tag::new(k, v))
}

/// Tags without `NO_VALUE`.
fn arb_plain_tags() -> impl Strategy<Value = Vec<Tag>> {
    proptest::collection::vec(arb_tag(vec!["", "x", "y"]), 0..6)
}

fn arb_tag_set(with_no_value: bool) -> impl Strategy<Value = TagSet> {
    let values = if with_no_value {
        vec!["", "x", "y", warden_core::NO_VALUE]
    } else {
        vec!["", "x", "y"]
    };
    proptest::collection::vec(arb_tag(values), 0..4).prop_map(|tags| tags.into_iter().collect())
}

fn arb_tag_set_list() -> impl Strategy<Value = TagSetList> {
    proptest::collection::vec(arb_tag_set(false), 0..3).prop_map(TagSetList::from)
}

fn decide(rules: &[Rule], service: &str, resource: &str, action: &str) -> Effect {
    get_match_rule(rules, service, resource, action, &[]).map_or(Effect::Deny, |r| r.result)
}

proptest! {
    /// A rule matches iff every non-wildcard level it compares is equal.
    #[test]
    fn prop_match_ignores_wildcards(
        rule in arb_rule(),
        request in proptest::collection::vec(select(vec!["a", "b"]), 3..6),
    ) {
        let extra = &request[3..];
        let compared: Vec<(&str, &str)> = rule
            .levels()
            .zip(request.iter().copied())
            .take(3 + rule.extra.len().min(extra.len()))
            .collect();
        let expected = compared
            .iter()
            .all(|(r, q)| r.is_empty() || *r == "*" || r == q);
        let m = rule.matches(request[0], request[1], request[2], extra);
        prop_assert_eq!(m.matched, expected);
        if m.matched {
            let concrete = compared.iter().filter(|(r, _)| !r.is_empty() && *r != "*").count();
            prop_assert_eq!(m.specificity as usize, concrete);
        }
    }

    /// Encoding then decoding answers every request like the original rules,
    /// including rules that reach into each other's branches through wildcards.
    #[test]
    fn prop_round_trip_preserves_answers_for_any_rules(
        rules in proptest::collection::vec(arb_rule(), 1..12),
    ) {
        let decoded = decode_rules(&encode_rules(&rules)).unwrap();
        let tokens = ["a", "b", "c"];
        for service in tokens {
            for resource in tokens {
                for action in tokens {
                    let extras: Vec<Vec<&str>> = std::iter::once(Vec::new())
                        .chain(tokens.iter().map(|e| vec![*e]))
                        .chain(tokens.iter().flat_map(|e| tokens.iter().map(move |f| vec![*e, *f])))
                        .collect();
                    for extra in &extras {
                        let before = get_match_rule(&rules, service, resource, action, extra).map_or(Effect::Deny, |r| r.result);
                        let after = get_match_rule(&decoded, service, resource, action, extra).map_or(Effect::Deny, |r| r.result);
                        prop_assert_eq!(before, after, "{}/{}/{}/{:?}", service, resource, action, extra);
                    }
                }
            }
        }
    }

    /// Over the closed action vocabulary, full action sets fold as well.
    #[test]
    fn prop_round_trip_preserves_answers(
        rules in proptest::collection::vec(arb_hierarchical_rule(), 1..12),
    ) {
        let decoded = decode_rules(&encode_rules(&rules)).unwrap();
        for service in SERVICES.iter().chain(&["network"]) {
            for resource in RESOURCES.iter().chain(&["ports"]) {
                for action in CANONICAL_ACTIONS {
                    prop_assert_eq!(
                        decide(&rules, service, resource, action),
                        decide(&decoded, service, resource, action),
                        "{}/{}/{}", service, resource, action
                    );
                }
            }
        }
    }

    #[test]
    fn prop_reduce_is_idempotent(rules in proptest::collection::vec(arb_rule(), 1..12)) {
        let mut tree = PolicyTree::from_rules(&rules);
        tree.reduce();
        let once = tree.to_value();
        tree.reduce();
        prop_assert_eq!(tree.to_value(), once);
    }

    #[test]
    fn prop_append_is_idempotent(tags in arb_plain_tags()) {
        let set: TagSet = tags.iter().cloned().collect();
        let again = set.clone().with(tags);
        prop_assert_eq!(again, set);
    }

    #[test]
    fn prop_append_is_order_independent(
        (tags, shuffled) in arb_plain_tags().prop_flat_map(|tags| {
            let shuffled = Just(tags.clone()).prop_shuffle();
            (Just(tags), shuffled)
        }),
    ) {
        let a: TagSet = tags.into_iter().collect();
        let b: TagSet = shuffled.into_iter().collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_contains_is_a_partial_order(a in arb_tag_set(true), b in arb_tag_set(true)) {
        prop_assert!(a.contains(&a));
        if a.contains(&b) && b.contains(&a) {
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn prop_intersect_list_commutes(a in arb_tag_set_list(), b in arb_tag_set_list()) {
        prop_assert_eq!(a.intersect_list(&b).sorted(), b.intersect_list(&a).sorted());
    }

    #[test]
    fn prop_intersect_list_associates(
        a in arb_tag_set_list(),
        b in arb_tag_set_list(),
        c in arb_tag_set_list(),
    ) {
        let left = a.intersect_list(&b).intersect_list(&c);
        let right = a.intersect_list(&b.intersect_list(&c));
        prop_assert_eq!(left.sorted(), right.sorted());
    }
}

#[test]
fn scenario_service_rule_matches_with_specificity_one() {
    let rules = vec![Rule::new("compute", Effect::Allow)];
    let m = rules[0].matches("compute", "servers", "list", &[]);
    assert!(m.matched);
    assert_eq!(m.specificity, 1);
}

#[test]
fn scenario_specific_deny_beats_global_allow() {
    let rules = vec![
        Rule::allow("*", "*", "*"),
        Rule::deny("compute", "servers", "list"),
    ];
    assert_eq!(decide(&rules, "compute", "servers", "list"), Effect::Deny);
}

#[test]
fn scenario_any_value_absorbs_specific_tag() {
    let mut set = TagSet::new();
    set.append([Tag::new("project", "a")]);
    set.append([Tag::any("project")]);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![&Tag::any("project")]);
}

#[test]
fn scenario_tag_containment_needs_matching_keys() {
    let narrow: TagSet = "project=a".parse().unwrap();
    let wide: TagSet = "project=a,env=c".parse().unwrap();
    assert!(!narrow.contains(&wide));
    assert!(!wide.contains(&narrow));

    let any: TagSet = "project".parse().unwrap();
    assert!(any.contains(&narrow));
}

#[test]
fn scenario_service_wildcard_contains_named_service() {
    let all = RuleSet::new(vec![Rule::new("*", Effect::Allow)]);
    let compute = RuleSet::new(vec![Rule::new("compute", Effect::Allow)]);
    assert!(all.contains(&compute));
    assert!(!compute.contains(&all));
}

#[test]
fn scenario_merge_with_deny_is_deny() {
    let allow = PolicyResult {
        project_tags: TagSetList::new().with("project=a".parse::<TagSet>().unwrap()),
        ..PolicyResult::allow_all()
    };
    assert_eq!(allow.merge(&PolicyResult::deny()).result, Effect::Deny);
}
