//! Guard rails for administrative assignments.
//!
//! An operator may only hand out policies that its own policies contain.
//! [`PolicySet`] compares composite verdicts, [`PolicyGroup`] adds the
//! scope at which each set is held.

use std::collections::BTreeMap;

use crate::error::GovernanceError;
use crate::policy::{PolicyMatches, PolicyResult, Sample, ScopedPolicy, samples};
use crate::scope::Scope;

/// Policies whose verdicts are OR-ed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    policies: Vec<ScopedPolicy>,
}

impl PolicySet {
    pub fn new(policies: Vec<ScopedPolicy>) -> Self {
        Self { policies }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScopedPolicy> {
        self.policies.iter()
    }

    pub fn push(&mut self, policy: ScopedPolicy) {
        self.policies.push(policy);
    }

    /// The composite verdict of every policy in the set.
    pub fn get_result(&self, service: &str, resource: &str, action: &str, extra: &[&str]) -> PolicyResult {
        self.policies
            .iter()
            .filter_map(|p| p.get_match_rule(service, resource, action, extra))
            .collect::<PolicyMatches>()
            .get_result()
    }

    fn sample_result(&self, sample: &Sample) -> PolicyResult {
        self.get_result(sample.service(), sample.resource(), sample.action(), &sample.extra())
    }

    /// Whether every request `other` allows is allowed here, under tag
    /// constraints at least as wide as `other`'s.
    pub fn contains(&self, other: &PolicySet) -> bool {
        let rules = self
            .iter()
            .chain(other.iter())
            .flat_map(|p| p.rules.iter());
        samples(rules).iter().all(|sample| {
            let theirs = other.sample_result(sample);
            if !theirs.is_allow() {
                return true;
            }
            let mine = self.sample_result(sample);
            mine.is_allow()
                && mine
                    .tag_levels()
                    .iter()
                    .zip(theirs.tag_levels())
                    .all(|(m, t)| m.contains_all(t))
        })
    }

    /// Whether assigning `assigned` would grant more than this set.
    pub fn violated_by(&self, assigned: &PolicySet) -> bool {
        !self.contains(assigned)
    }
}

impl From<ScopedPolicy> for PolicySet {
    fn from(policy: ScopedPolicy) -> Self {
        Self::new(vec![policy])
    }
}

impl FromIterator<ScopedPolicy> for PolicySet {
    fn from_iter<I: IntoIterator<Item = ScopedPolicy>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// The policy sets held by one principal, keyed by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyGroup {
    sets: BTreeMap<Scope, PolicySet>,
}

impl PolicyGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a policy at `scope`.
    pub fn with(mut self, scope: Scope, policy: ScopedPolicy) -> Self {
        self.insert(scope, policy);
        self
    }

    pub fn insert(&mut self, scope: Scope, policy: ScopedPolicy) {
        self.sets.entry(scope).or_default().push(policy);
    }

    pub fn get(&self, scope: Scope) -> Option<&PolicySet> {
        self.sets.get(&scope)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(PolicySet::is_empty)
    }

    /// The broadest scope holding a policy; `Scope::None` when empty.
    pub fn highest_scope(&self) -> Scope {
        self.sets
            .iter()
            .rev()
            .find(|(_, set)| !set.is_empty())
            .map_or(Scope::None, |(scope, _)| *scope)
    }

    /// Check that `self`, the operator's group, may assign `assigned`.
    pub fn validate_assignment(&self, assigned: &PolicyGroup) -> Result<(), GovernanceError> {
        let operator = self.highest_scope();
        let wanted = assigned.highest_scope();
        if wanted.higher_than(operator) {
            tracing::warn!(%operator, assigned = %wanted, "rejected assignment: scope escalation");
            return Err(GovernanceError::ScopeEscalation {
                operator,
                assigned: wanted,
            });
        }
        if wanted == operator {
            let empty = PolicySet::default();
            let mine = self.get(operator).unwrap_or(&empty);
            let theirs = assigned.get(wanted).unwrap_or(&empty);
            if mine.violated_by(theirs) {
                tracing::warn!(scope = %operator, "rejected assignment: exceeds operator policies");
                return Err(GovernanceError::PolicyViolation { scope: operator });
            }
        }
        tracing::info!(%operator, assigned = %wanted, "assignment accepted");
        Ok(())
    }
}

/// Check that an operator holding `operator` may create `policy` at
/// `policy_scope`: some operator set from System down to `policy_scope`
/// must contain it.
pub fn validate_policy_privilege(
    operator: &PolicyGroup,
    policy_scope: Scope,
    policy: &ScopedPolicy,
) -> Result<(), GovernanceError> {
    let candidate = PolicySet::from(policy.clone());
    let allowed = Scope::DESCENDING
        .iter()
        .take_while(|scope| **scope >= policy_scope)
        .filter_map(|scope| operator.get(*scope).map(|set| (scope, set)))
        .find(|(_, set)| set.contains(&candidate));
    match allowed {
        Some((scope, _)) => {
            tracing::info!(%scope, %policy_scope, "policy within operator privilege");
            Ok(())
        }
        None => {
            tracing::warn!(%policy_scope, "policy exceeds operator privilege");
            Err(GovernanceError::PrivilegeViolation {
                scope: policy_scope,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Effect, Rule};
    use crate::tagset::{TagSet, TagSetList};
    use pretty_assertions::assert_eq;

    fn policy(rules: Vec<Rule>) -> ScopedPolicy {
        ScopedPolicy::new(rules)
    }

    fn tags(s: &str) -> TagSetList {
        TagSetList::new().with(s.parse::<TagSet>().unwrap())
    }

    fn compute_admin() -> ScopedPolicy {
        policy(vec![Rule::new("compute", Effect::Allow)])
    }

    fn compute_reader() -> ScopedPolicy {
        policy(vec![
            Rule::allow("compute", "*", "get"),
            Rule::allow("compute", "*", "list"),
        ])
    }

    #[test_log::test]
    fn test_overlapping_grant_is_a_violation() {
        let granting = PolicySet::from(policy(vec![
            Rule::allow("*", "*", "*"),
            Rule::deny("compute", "*", "list"),
        ]));
        let assigned = PolicySet::from(policy(vec![Rule::allow("*", "servers", "*")]));
        assert!(!granting.contains(&assigned));
        assert!(granting.violated_by(&assigned));
    }

    #[test]
    fn test_set_contains_union_of_members() {
        let set = PolicySet::new(vec![
            policy(vec![Rule::new("compute", Effect::Allow)]),
            policy(vec![Rule::new("image", Effect::Allow)]),
        ]);
        let both = PolicySet::from(policy(vec![
            Rule::new("compute", Effect::Allow),
            Rule::new("image", Effect::Allow),
        ]));
        assert!(set.contains(&both));
        assert!(both.contains(&set));
        assert!(!set.violated_by(&both));
    }

    #[test]
    fn test_set_violated_by_wider_assignment() {
        let operator = PolicySet::from(compute_reader());
        let assigned = PolicySet::from(compute_admin());
        assert!(operator.violated_by(&assigned));
        assert!(!PolicySet::from(compute_admin()).violated_by(&operator));
    }

    #[test]
    fn test_set_compares_tag_scoping() {
        let wide = PolicySet::from(compute_admin().with_project_tags(tags("project")));
        let narrow = PolicySet::from(compute_admin().with_project_tags(tags("project=a")));
        assert!(wide.contains(&narrow));
        assert!(narrow.violated_by(&wide));
    }

    #[test]
    fn test_highest_scope() {
        assert_eq!(PolicyGroup::new().highest_scope(), Scope::None);
        let group = PolicyGroup::new()
            .with(Scope::Project, compute_reader())
            .with(Scope::Domain, compute_admin());
        assert_eq!(group.highest_scope(), Scope::Domain);
    }

    #[test_log::test]
    fn test_assignment_rejects_scope_escalation() {
        let operator = PolicyGroup::new().with(Scope::Project, compute_admin());
        let assigned = PolicyGroup::new().with(Scope::System, compute_reader());
        let err = operator.validate_assignment(&assigned).unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::ScopeEscalation {
                operator: Scope::Project,
                assigned: Scope::System
            }
        ));
    }

    #[test_log::test]
    fn test_assignment_same_scope_needs_containment() {
        let operator = PolicyGroup::new().with(Scope::Domain, compute_reader());
        let assigned = PolicyGroup::new().with(Scope::Domain, compute_admin());
        let err = operator.validate_assignment(&assigned).unwrap_err();
        assert!(matches!(err, GovernanceError::PolicyViolation { scope: Scope::Domain }));

        let assigned = PolicyGroup::new().with(Scope::Domain, compute_reader());
        assert!(operator.validate_assignment(&assigned).is_ok());
    }

    #[test]
    fn test_assignment_lower_scope_accepted() {
        let operator = PolicyGroup::new().with(Scope::Domain, compute_reader());
        let assigned = PolicyGroup::new().with(Scope::Project, compute_admin());
        assert!(operator.validate_assignment(&assigned).is_ok());
    }

    #[test]
    fn test_policy_privilege() {
        let operator = PolicyGroup::new()
            .with(Scope::System, compute_reader())
            .with(Scope::Project, compute_admin());

        assert!(validate_policy_privilege(&operator, Scope::Project, &compute_admin()).is_ok());
        assert!(validate_policy_privilege(&operator, Scope::Domain, &compute_reader()).is_ok());

        let err = validate_policy_privilege(&operator, Scope::Domain, &compute_admin()).unwrap_err();
        assert!(matches!(err, GovernanceError::PrivilegeViolation { scope: Scope::Domain }));
    }
}
