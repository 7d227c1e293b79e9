#![deny(unsafe_code)]

//! Warden authorization engine.
//!
//! Decides whether a principal may perform `(service, resource, action,
//! extra...)` and under which domain, project and object tag constraints.
//! Policies are decoded once into a [`PolicySnapshot`] and evaluated without
//! locking; [`SharedSnapshot`] swaps whole snapshots for callers that
//! refresh them.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Policy document decode and encode boundary.
pub mod document;
/// Engine error types.
pub mod error;
/// Containment checks guarding administrative assignments.
pub mod governance;
/// Principal matching and weighted policy selection.
pub mod identity;
/// Scoped policies and verdict composition.
pub mod policy;
/// Rule matching with wildcard levels and specificity scoring.
pub mod rule;
/// Administrative scopes.
pub mod scope;
/// Evaluation entry points.
pub mod snapshot;
/// Tag-set algebra.
pub mod tagset;
/// Wildcard tree codec and reducer.
pub mod tree;

pub use document::{decode_policy_data, decode_policy_document, encode_policy_document};
pub use error::{GovernanceError, PolicyError, Result};
pub use governance::{PolicyGroup, PolicySet, validate_policy_privilege};
pub use identity::{IpPrefix, RbacIdentity, RbacPolicy, SimpleIdentity, get_matched_policies};
pub use policy::{PolicyMatch, PolicyMatches, PolicyResult, RuleSet, ScopedPolicy};
pub use rule::{Effect, Rule, get_match_rule};
pub use scope::Scope;
pub use snapshot::{ExplainRequest, PolicySnapshot, SharedSnapshot};
pub use tagset::{ANY_VALUE, NO_VALUE, Tag, TagSet, TagSetList};
pub use tree::PolicyTree;
