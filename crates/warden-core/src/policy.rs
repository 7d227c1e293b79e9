//! Rule sets, tag-scoped policies and the composition of their verdicts.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rule::{Effect, Rule, WILDCARD, get_match_rule, is_wildcard};
use crate::tagset::TagSetList;

/// An unordered list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get_match_rule(&self, service: &str, resource: &str, action: &str, extra: &[&str]) -> Option<&Rule> {
        get_match_rule(&self.rules, service, resource, action, extra)
    }

    /// The effect for a request; no matching rule is Deny.
    pub fn decide(&self, service: &str, resource: &str, action: &str, extra: &[&str]) -> Effect {
        self.get_match_rule(service, resource, action, extra)
            .map_or(Effect::Deny, |rule| rule.result)
    }

    fn decide_sample(&self, sample: &Sample) -> Effect {
        self.decide(sample.service(), sample.resource(), sample.action(), &sample.extra())
    }

    /// Whether every request `other` allows is also allowed here.
    ///
    /// With two effects this also means every request denied here is denied
    /// by `other`. Every distinct way a request can meet the rules of both
    /// sides is sampled, see [`samples`].
    pub fn contains(&self, other: &RuleSet) -> bool {
        samples(self.iter().chain(other.iter())).iter().all(|sample| {
            other.decide_sample(sample) == Effect::Deny
                || self.decide_sample(sample) == Effect::Allow
        })
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// A concrete request tuple used to compare two policies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Sample(Vec<String>);

impl Sample {
    pub(crate) fn service(&self) -> &str {
        &self.0[0]
    }

    pub(crate) fn resource(&self) -> &str {
        &self.0[1]
    }

    pub(crate) fn action(&self) -> &str {
        &self.0[2]
    }

    pub(crate) fn extra(&self) -> Vec<&str> {
        self.0[3..].iter().map(String::as_str).collect()
    }
}

/// Levels every request carries: service, resource, action.
const FIXED_LEVELS: usize = 3;

/// One request for every distinct set of rules a request can match.
///
/// At each level the request takes every concrete token of a rule still in
/// play, plus `"*"`, which no concrete rule token equals and so stands for
/// every other token. At extra levels the request may also stop, leaving
/// deeper rule levels uncompared. Two requests that match the same rules get
/// the same answer from any policy built on them.
pub(crate) fn samples<'a, I: IntoIterator<Item = &'a Rule>>(rules: I) -> BTreeSet<Sample> {
    let rules: Vec<Vec<&str>> = rules.into_iter().map(|r| r.levels().collect()).collect();
    let live: Vec<usize> = (0..rules.len()).collect();
    let mut out = BTreeSet::new();
    expand_samples(&rules, &live, &mut Vec::new(), &mut out);
    out
}

fn expand_samples<'a>(
    rules: &[Vec<&'a str>],
    live: &[usize],
    prefix: &mut Vec<&'a str>,
    out: &mut BTreeSet<Sample>,
) {
    let level = prefix.len();
    if level >= FIXED_LEVELS {
        out.insert(Sample(prefix.iter().map(|l| l.to_string()).collect()));
        if live.iter().all(|&i| rules[i].len() <= level) {
            return;
        }
    }

    let concrete = |i: usize| rules[i].get(level).copied().filter(|l| !is_wildcard(l));
    let tokens: BTreeSet<&'a str> = live.iter().filter_map(|&i| concrete(i)).collect();
    for token in tokens.into_iter().chain([WILDCARD]) {
        let next: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| concrete(i).is_none_or(|l| l == token))
            .collect();
        prefix.push(token);
        expand_samples(rules, &next, prefix, out);
        prefix.pop();
    }
}

/// A rule set restricted to domain, project and object tag disjunctions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedPolicy {
    pub rules: RuleSet,
    pub domain_tags: TagSetList,
    pub project_tags: TagSetList,
    pub object_tags: TagSetList,
}

impl ScopedPolicy {
    pub fn new(rules: impl Into<RuleSet>) -> Self {
        Self {
            rules: rules.into(),
            ..Self::default()
        }
    }

    pub fn with_domain_tags(mut self, tags: TagSetList) -> Self {
        self.domain_tags = tags;
        self
    }

    pub fn with_project_tags(mut self, tags: TagSetList) -> Self {
        self.project_tags = tags;
        self
    }

    pub fn with_object_tags(mut self, tags: TagSetList) -> Self {
        self.object_tags = tags;
        self
    }

    fn tag_levels(&self) -> [&TagSetList; 3] {
        [&self.domain_tags, &self.project_tags, &self.object_tags]
    }

    /// The rule deciding a request, paired with this policy's tag constraints.
    pub fn get_match_rule(
        &self,
        service: &str,
        resource: &str,
        action: &str,
        extra: &[&str],
    ) -> Option<PolicyMatch> {
        let rule = self.rules.get_match_rule(service, resource, action, extra)?;
        Some(PolicyMatch {
            rule: rule.clone(),
            domain_tags: self.domain_tags.clone(),
            project_tags: self.project_tags.clone(),
            object_tags: self.object_tags.clone(),
        })
    }

    /// Rule containment plus tag containment at every level.
    pub fn contains(&self, other: &ScopedPolicy) -> bool {
        self.rules.contains(&other.rules)
            && self
                .tag_levels()
                .iter()
                .zip(other.tag_levels())
                .all(|(mine, theirs)| mine.contains_all(theirs))
    }
}

/// One policy's verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch {
    pub rule: Rule,
    pub domain_tags: TagSetList,
    pub project_tags: TagSetList,
    pub object_tags: TagSetList,
}

impl PolicyMatch {
    fn tag_levels(&self) -> [&TagSetList; 3] {
        [&self.domain_tags, &self.project_tags, &self.object_tags]
    }
}

/// The verdicts of every policy that applies to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyMatches(Vec<PolicyMatch>);

impl PolicyMatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, m: PolicyMatch) {
        self.0.push(m);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PolicyMatch> {
        self.0.iter()
    }

    /// OR the Allow matches together.
    ///
    /// Deny unless some match allows. The tag lists of allowing matches are
    /// unioned per level; an allowing match with no constraint at a level
    /// leaves that level unconstrained.
    pub fn get_result(&self) -> PolicyResult {
        let mut result = PolicyResult::deny();
        let mut unconstrained = [false; 3];
        for m in self.0.iter().filter(|m| m.rule.result == Effect::Allow) {
            result.result = Effect::Allow;
            for (i, (acc, tags)) in result.tag_levels_mut().into_iter().zip(m.tag_levels()).enumerate() {
                if tags.is_unconstrained() {
                    unconstrained[i] = true;
                    continue;
                }
                for set in tags {
                    acc.append(set.clone());
                }
            }
        }
        for (acc, free) in result.tag_levels_mut().into_iter().zip(unconstrained) {
            if free {
                *acc = TagSetList::new();
            }
        }
        result
    }
}

impl FromIterator<PolicyMatch> for PolicyMatches {
    fn from_iter<I: IntoIterator<Item = PolicyMatch>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The aggregate verdict for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyResult {
    pub result: Effect,
    #[serde(skip_serializing_if = "TagSetList::is_empty")]
    pub domain_tags: TagSetList,
    #[serde(skip_serializing_if = "TagSetList::is_empty")]
    pub project_tags: TagSetList,
    #[serde(skip_serializing_if = "TagSetList::is_empty")]
    pub object_tags: TagSetList,
}

impl PolicyResult {
    pub fn deny() -> Self {
        Self {
            result: Effect::Deny,
            domain_tags: TagSetList::new(),
            project_tags: TagSetList::new(),
            object_tags: TagSetList::new(),
        }
    }

    /// Allow with no tag constraint.
    pub fn allow_all() -> Self {
        Self {
            result: Effect::Allow,
            ..Self::deny()
        }
    }

    pub fn is_allow(&self) -> bool {
        self.result == Effect::Allow
    }

    pub fn tag_levels(&self) -> [&TagSetList; 3] {
        [&self.domain_tags, &self.project_tags, &self.object_tags]
    }

    fn tag_levels_mut(&mut self) -> [&mut TagSetList; 3] {
        [&mut self.domain_tags, &mut self.project_tags, &mut self.object_tags]
    }

    /// AND two verdicts: Deny dominates, tag constraints narrow.
    pub fn merge(&self, other: &PolicyResult) -> PolicyResult {
        if !self.is_allow() || !other.is_allow() {
            return PolicyResult::deny();
        }
        PolicyResult {
            result: Effect::Allow,
            domain_tags: self.domain_tags.intersect_list(&other.domain_tags),
            project_tags: self.project_tags.intersect_list(&other.project_tags),
            object_tags: self.object_tags.intersect_list(&other.object_tags),
        }
    }
}

impl Default for PolicyResult {
    fn default() -> Self {
        Self::deny()
    }
}

impl fmt::Display for PolicyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result)?;
        if !self.is_allow() {
            return Ok(());
        }
        for (name, tags) in ["domain", "project", "object"].iter().zip(self.tag_levels()) {
            if !tags.is_empty() {
                write!(f, " {name}=[{}]", tags.flatten())?;
            }
        }
        Ok(())
    }
}
