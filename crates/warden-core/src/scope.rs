//! Administrative scopes a policy is granted at.
//!
//! Scopes are totally ordered: `none < user < project < domain < system`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// The level at which a policy grants privileges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    None,
    User,
    Project,
    Domain,
    System,
}

impl Scope {
    /// All scopes from the broadest to the narrowest.
    pub const DESCENDING: [Scope; 5] = [
        Scope::System,
        Scope::Domain,
        Scope::Project,
        Scope::User,
        Scope::None,
    ];

    /// Whether this scope strictly outranks `other`.
    pub fn higher_than(self, other: Scope) -> bool {
        self > other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::None => "none",
            Scope::User => "user",
            Scope::Project => "project",
            Scope::Domain => "domain",
            Scope::System => "system",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Scope::None),
            "user" => Ok(Scope::User),
            "project" => Ok(Scope::Project),
            "domain" => Ok(Scope::Domain),
            "system" => Ok(Scope::System),
            _ => Err(PolicyError::InvalidScope(s.to_string())),
        }
    }
}
