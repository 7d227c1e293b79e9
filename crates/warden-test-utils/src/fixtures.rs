//! Identity and policy fixtures.

use warden_core::{
    Effect, PolicySnapshot, RbacPolicy, Rule, Scope, ScopedPolicy, SimpleIdentity, TagSet,
    TagSetList,
};

/// Authenticated project member in domain `d1`, project `p1`.
pub fn member() -> SimpleIdentity {
    SimpleIdentity::new("d1")
        .with_project("p1")
        .with_roles(["member"])
        .with_login_ip("10.1.2.3".parse().expect("valid address"))
}

/// Authenticated system administrator in domain `default`.
pub fn admin() -> SimpleIdentity {
    SimpleIdentity::new("default").with_roles(["admin"])
}

/// Unauthenticated caller with no roles.
pub fn anonymous() -> SimpleIdentity {
    SimpleIdentity::new("d1").anonymous()
}

/// A single-disjunct tag list parsed from `key=value,...`.
pub fn tags(s: &str) -> TagSetList {
    TagSetList::new().with(s.parse::<TagSet>().expect("valid tag set"))
}

/// Everything in `compute`.
pub fn compute_admin() -> ScopedPolicy {
    ScopedPolicy::new(vec![Rule::new("compute", Effect::Allow)])
}

/// `get` and `list` on every compute resource.
pub fn compute_reader() -> ScopedPolicy {
    ScopedPolicy::new(vec![
        Rule::allow("compute", "*", "get"),
        Rule::allow("compute", "*", "list"),
    ])
}

/// Everything except deleting servers, limited to `env=dev` projects.
pub fn compute_member() -> ScopedPolicy {
    ScopedPolicy::new(vec![
        Rule::new("compute", Effect::Allow),
        Rule::deny("compute", "servers", "delete"),
    ])
    .with_project_tags(tags("env=dev"))
}

/// A snapshot with a system admin policy, a project member policy and a
/// domain-wide reader policy.
pub fn sample_snapshot() -> PolicySnapshot {
    PolicySnapshot::new(vec![
        RbacPolicy {
            roles: vec!["admin".to_string()],
            ..RbacPolicy::new(
                "sys-admin",
                Scope::System,
                ScopedPolicy::new(vec![Rule::new("*", Effect::Allow)]),
            )
        },
        RbacPolicy {
            roles: vec!["member".to_string()],
            ..RbacPolicy::new("project-member", Scope::Project, compute_member())
        },
        RbacPolicy {
            domain_id: Some("d1".to_string()),
            ..RbacPolicy::new("domain-reader", Scope::Domain, compute_reader())
        },
    ])
}
