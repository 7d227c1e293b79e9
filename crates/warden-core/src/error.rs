//! Error types for the authorization engine.
//!
//! Only malformed input is an error. A request that matches no rule, or an
//! identity that matches no policy, resolves to [`Effect::Deny`](crate::Effect)
//! and never surfaces here.

use crate::scope::Scope;

/// Errors raised while decoding policies, tags, scopes and requests.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("malformed policy node at {path:?}: expected a string or a mapping, got {found}")]
    MalformedNode { path: String, found: &'static str },

    #[error("unknown policy result {value:?} at {path:?}")]
    UnknownResult { path: String, value: String },

    #[error("policy decodes to an empty rule set")]
    EmptyPolicy,

    #[error("invalid tag set: {0}")]
    InvalidTag(String),

    #[error("invalid scope {0:?}")]
    InvalidScope(String),

    #[error("invalid ip prefix {0:?}")]
    InvalidIpPrefix(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to (de)serialize policy document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejection of an administrative assignment by the governance checks.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("assignment requires scope {assigned} but operator only holds {operator}")]
    ScopeEscalation { operator: Scope, assigned: Scope },

    #[error("assigned policies exceed the operator's {scope} policies")]
    PolicyViolation { scope: Scope },

    #[error("policy exceeds every operator policy up to scope {scope}")]
    PrivilegeViolation { scope: Scope },
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
