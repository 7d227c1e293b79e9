//! End-to-end scenarios over the shared fixtures: config in, verdicts out.

use pretty_assertions::assert_eq;
use warden_core::{Effect, Scope, TagSetList};
use warden_test_utils::catalogue::TestCatalogue;
use warden_test_utils::config::{TestConfigBuilder, file_entry, inline_entry};
use warden_test_utils::fixtures;
use warden_test_utils::tracing_setup::init_test_tracing;

#[tokio::test]
async fn test_inline_catalogue_selects_most_specific_policy() {
    init_test_tracing();
    let config = TestConfigBuilder::new()
        .log_level("debug")
        .inline_policy("everyone", Scope::Project, "compute = \"deny\"")
        .policy(warden_config::PolicyEntryConfig {
            roles: vec!["member".to_string()],
            projects: vec!["p1".to_string()],
            ..inline_entry("p1-members", Scope::Project, "compute = \"allow\"")
        })
        .build();
    config.validate().unwrap();
    let snapshot = config.build_snapshot().await.unwrap();

    let matched = snapshot.matched_policies(Scope::Project, &fixtures::member());
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "p1-members");
    assert_eq!(
        snapshot.allow(false, &fixtures::member(), "compute", "servers", "list", &[]),
        Effect::Allow
    );

    // Anyone outside p1 falls back to the unconstrained policy.
    let outsider = fixtures::member().with_project("p2");
    assert_eq!(
        snapshot.allow(false, &outsider, "compute", "servers", "list", &[]),
        Effect::Deny
    );
}

#[tokio::test]
async fn test_authenticated_only_policy_rejects_anonymous() {
    let config = TestConfigBuilder::new()
        .policy(warden_config::PolicyEntryConfig {
            auth: true,
            ..inline_entry("signed-in", Scope::Project, "image = \"allow\"")
        })
        .build();
    let snapshot = config.build_snapshot().await.unwrap();

    let anonymous = fixtures::anonymous();
    assert_eq!(
        snapshot.allow(false, &anonymous, "image", "images", "get", &[]),
        Effect::Deny
    );
    assert_eq!(
        snapshot.allow(false, &fixtures::member(), "image", "images", "get", &[]),
        Effect::Allow
    );
}

#[test_log::test(tokio::test)]
async fn test_file_entries_resolve_against_policy_dir() {
    let catalogue = TestCatalogue::with_toml("").await;
    catalogue
        .write_policy(
            "policies/member.json",
            r#"{"policy": {"compute": "allow"}, "project_tags": [{"env": "dev"}]}"#,
        )
        .await;

    let config = TestConfigBuilder::new()
        .default_scope(Scope::Domain)
        .policy_dir(catalogue.dir().join("policies"))
        .policy(file_entry("member", Scope::Domain, "member.json"))
        .build();
    let snapshot = config.build_snapshot().await.unwrap();

    let result = snapshot.allow_merged(
        &[config.engine.default_scope],
        &fixtures::member(),
        "compute",
        "servers",
        "list",
        &[],
    );
    assert!(result.is_allow());
    assert_eq!(result.project_tags, fixtures::tags("env=dev"));
    assert_eq!(result.domain_tags, TagSetList::new());
}

#[tokio::test]
async fn test_rewritten_config_can_disable_violation_check() {
    let catalogue = TestCatalogue::with_toml("").await;
    catalogue
        .write_config(
            r#"
[governance]
violation_check = false

[[policies]]
name = "reader"
scope = "domain"
document = { compute = { "*" = { get = "allow" } } }

[[policies]]
name = "root"
scope = "system"
document = { "*" = "allow" }
"#,
        )
        .await;

    let config = catalogue.load().await;
    let snapshot = catalogue.snapshot().await;
    let names = |n: &str| vec![n.to_string()];
    assert!(
        config
            .validate_assignment(&snapshot, &names("reader"), &names("root"))
            .is_ok()
    );

    let strict = TestConfigBuilder::new().violation_check(true).build();
    assert!(
        strict
            .validate_assignment(&snapshot, &names("reader"), &names("root"))
            .is_err()
    );
}

#[test]
fn test_policy_fixtures_are_ordered_by_containment() {
    let admin = fixtures::compute_admin();
    let reader = fixtures::compute_reader();
    assert!(admin.contains(&reader));
    assert!(!reader.contains(&admin));

    // The member fixture is tag-limited, so the unconstrained admin covers it.
    assert!(admin.contains(&fixtures::compute_member()));
}
