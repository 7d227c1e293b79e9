//! Evaluation entry points over an immutable set of decoded policies.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{PolicyError, Result};
use crate::identity::{RbacIdentity, RbacPolicy, get_matched_policies};
use crate::policy::{PolicyMatches, PolicyResult};
use crate::rule::{Effect, WILDCARD};
use crate::scope::Scope;

/// The decoded policy catalogue. Never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    policies: Vec<RbacPolicy>,
}

impl PolicySnapshot {
    pub fn new(policies: Vec<RbacPolicy>) -> Self {
        tracing::debug!(policies = policies.len(), "built policy snapshot");
        Self { policies }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn policies(&self) -> &[RbacPolicy] {
        &self.policies
    }

    pub fn get(&self, name: &str) -> Option<&RbacPolicy> {
        self.policies.iter().find(|p| p.name == name)
    }

    /// The policies granted at `scope` that apply to `identity`.
    pub fn matched_policies<I: RbacIdentity + ?Sized>(&self, scope: Scope, identity: &I) -> Vec<&RbacPolicy> {
        get_matched_policies(self.policies.iter().filter(|p| p.scope == scope), identity)
    }

    /// The composite verdict of the `scope` policies that apply to `identity`.
    pub fn allow_in_scope<I: RbacIdentity + ?Sized>(
        &self,
        scope: Scope,
        identity: &I,
        service: &str,
        resource: &str,
        action: &str,
        extra: &[&str],
    ) -> PolicyResult {
        let matched = self.matched_policies(scope, identity);
        let matches: PolicyMatches = matched
            .iter()
            .filter_map(|p| p.policy.get_match_rule(service, resource, action, extra))
            .collect();
        let result = matches.get_result();
        tracing::debug!(
            %scope,
            policies = matched.len(),
            service,
            resource,
            action,
            result = %result,
            "evaluated request"
        );
        result
    }

    /// Admin requests evaluate System policies, everything else Project policies.
    pub fn allow<I: RbacIdentity + ?Sized>(
        &self,
        is_admin: bool,
        identity: &I,
        service: &str,
        resource: &str,
        action: &str,
        extra: &[&str],
    ) -> Effect {
        let scope = if is_admin { Scope::System } else { Scope::Project };
        self.allow_in_scope(scope, identity, service, resource, action, extra)
            .result
    }

    /// The verdicts of several scopes AND-ed together. No scope is Deny.
    pub fn allow_merged<I: RbacIdentity + ?Sized>(
        &self,
        scopes: &[Scope],
        identity: &I,
        service: &str,
        resource: &str,
        action: &str,
        extra: &[&str],
    ) -> PolicyResult {
        let mut results = scopes
            .iter()
            .map(|scope| self.allow_in_scope(*scope, identity, service, resource, action, extra));
        let Some(first) = results.next() else {
            return PolicyResult::deny();
        };
        results.fold(first, |acc, r| acc.merge(&r))
    }

    /// Evaluate a batch of `key -> [scope, service, resource?, action?, extra...]`.
    pub fn explain<I: RbacIdentity + ?Sized>(
        &self,
        identity: &I,
        batch: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, bool>> {
        batch
            .iter()
            .map(|(key, item)| {
                let request = ExplainRequest::from_item(key, item)?;
                Ok((key.clone(), request.evaluate(self, identity).is_allow()))
            })
            .collect()
    }
}

/// One item of an explain batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainRequest {
    pub key: String,
    pub scope: Scope,
    pub service: String,
    pub resource: String,
    pub action: String,
    pub extra: Vec<String>,
}

impl ExplainRequest {
    /// Build from a batch item `[scope, service, resource?, action?, extra...]`.
    pub fn from_item(key: &str, item: &[String]) -> Result<Self> {
        let [scope, service, rest @ ..] = item else {
            return Err(PolicyError::InvalidRequest(format!(
                "{key}: expected at least a scope and a service"
            )));
        };
        if service.is_empty() {
            return Err(PolicyError::InvalidRequest(format!("{key}: empty service")));
        }
        let level = |i: usize| rest.get(i).map_or(WILDCARD, String::as_str).to_string();
        Ok(Self {
            key: key.to_string(),
            scope: scope.parse()?,
            service: service.clone(),
            resource: level(0),
            action: level(1),
            extra: rest.iter().skip(2).cloned().collect(),
        })
    }

    /// Parse `key:scope:service[:resource[:action[:extra...]]]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(':').map(str::trim);
        let key = parts
            .next()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PolicyError::InvalidRequest(format!("{s}: missing key")))?;
        let item: Vec<String> = parts.map(str::to_string).collect();
        Self::from_item(key, &item)
    }

    pub fn evaluate<I: RbacIdentity + ?Sized>(&self, snapshot: &PolicySnapshot, identity: &I) -> PolicyResult {
        let extra: Vec<&str> = self.extra.iter().map(String::as_str).collect();
        snapshot.allow_in_scope(
            self.scope,
            identity,
            &self.service,
            &self.resource,
            &self.action,
            &extra,
        )
    }
}

/// A swappable handle to the current snapshot.
///
/// Readers take an `Arc` and evaluate against it; [`replace`](Self::replace)
/// swaps the whole catalogue. Starts empty, so everything is denied until
/// the first snapshot is installed.
#[derive(Debug, Default)]
pub struct SharedSnapshot {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<PolicySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, snapshot: PolicySnapshot) {
        let snapshot = Arc::new(snapshot);
        tracing::info!(policies = snapshot.len(), "replaced policy snapshot");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}
