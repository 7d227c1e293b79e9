//! Selecting the policies that apply to a principal.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::policy::ScopedPolicy;
use crate::scope::Scope;

const WEIGHT_UNCONSTRAINED: u32 = 1;
const WEIGHT_DOMAIN_EXACT: u32 = 30;
const WEIGHT_DOMAIN_SHARED: u32 = 20;
const WEIGHT_DOMAIN_PUBLIC: u32 = 10;
const WEIGHT_ROLES: u32 = 100;
const WEIGHT_PROJECT: u32 = 1000;
const WEIGHT_IP: u32 = 10000;

/// What the engine needs to know about the caller.
pub trait RbacIdentity {
    fn domain_id(&self) -> &str;
    fn project_name(&self) -> &str;
    fn role_names(&self) -> &[String];
    fn login_ip(&self) -> Option<IpAddr>;
    fn is_authenticated(&self) -> bool;
}

/// A plain identity value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleIdentity {
    pub domain_id: String,
    pub project: String,
    pub roles: Vec<String>,
    pub login_ip: Option<IpAddr>,
    pub authenticated: bool,
}

impl SimpleIdentity {
    /// An authenticated identity in `domain_id`.
    pub fn new(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_login_ip(mut self, ip: IpAddr) -> Self {
        self.login_ip = Some(ip);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

impl RbacIdentity for SimpleIdentity {
    fn domain_id(&self) -> &str {
        &self.domain_id
    }

    fn project_name(&self) -> &str {
        &self.project
    }

    fn role_names(&self) -> &[String] {
        &self.roles
    }

    fn login_ip(&self) -> Option<IpAddr> {
        self.login_ip
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

/// An address prefix such as `10.0.0.0/8`, `192.168.1.5` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    addr: IpAddr,
    len: u8,
}

impl IpPrefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PolicyError> {
        if len > max_len(addr) {
            return Err(PolicyError::InvalidIpPrefix(format!("{addr}/{len}")));
        }
        Ok(Self { addr, len })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.addr, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.len)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.len)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn max_len(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for IpPrefix {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PolicyError::InvalidIpPrefix(s.to_string());
        let s = s.trim();
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let len = match len {
            Some(len) => len.parse().map_err(|_| invalid())?,
            None => max_len(addr),
        };
        Self::new(addr, len).map_err(|_| invalid())
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for IpPrefix {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A scoped policy plus the principals it applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RbacPolicy {
    pub name: String,
    pub policy: ScopedPolicy,
    /// Scope the policy is granted at.
    pub scope: Scope,
    /// Owning domain; `None` for policies not tied to one.
    pub domain_id: Option<String>,
    pub is_public: bool,
    /// How far a public policy is published: `Domain` (shared domains only)
    /// or `System` (every domain).
    pub public_scope: Scope,
    pub shared_domain_ids: Vec<String>,
    pub projects: Vec<String>,
    pub roles: Vec<String>,
    pub ips: Vec<IpPrefix>,
    /// Require an authenticated identity.
    pub auth: bool,
}

impl RbacPolicy {
    pub fn new(name: impl Into<String>, scope: Scope, policy: ScopedPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            scope,
            ..Self::default()
        }
    }

    fn has_principal_constraints(&self) -> bool {
        self.auth
            || self.has_domain_constraint()
            || !self.projects.is_empty()
            || !self.roles.is_empty()
            || !self.ips.is_empty()
    }

    fn has_domain_constraint(&self) -> bool {
        self.domain_id.is_some() || self.is_public || !self.shared_domain_ids.is_empty()
    }

    fn domain_weight<I: RbacIdentity + ?Sized>(&self, identity: &I) -> Option<u32> {
        let domain = identity.domain_id();
        if self.domain_id.as_deref() == Some(domain) {
            Some(WEIGHT_DOMAIN_EXACT)
        } else if self.shared_domain_ids.iter().any(|d| d == domain) {
            Some(WEIGHT_DOMAIN_SHARED)
        } else if self.is_public && self.public_scope == Scope::System {
            Some(WEIGHT_DOMAIN_PUBLIC)
        } else {
            None
        }
    }

    /// Whether the policy applies to `identity`, and how specifically.
    pub fn matches<I: RbacIdentity + ?Sized>(&self, identity: &I) -> (bool, u32) {
        if !self.has_principal_constraints() {
            return (true, WEIGHT_UNCONSTRAINED);
        }
        if self.auth && !identity.is_authenticated() {
            return (false, 0);
        }

        let mut weight = 0;
        if self.has_domain_constraint() {
            match self.domain_weight(identity) {
                Some(w) => weight += w,
                None => return (false, 0),
            }
        }
        if !self.roles.is_empty() {
            if !identity.role_names().iter().any(|r| self.roles.contains(r)) {
                return (false, 0);
            }
            weight += WEIGHT_ROLES;
        }
        if !self.projects.is_empty() {
            if !self.projects.iter().any(|p| p == identity.project_name()) {
                return (false, 0);
            }
            weight += WEIGHT_PROJECT;
        }
        if !self.ips.is_empty() {
            let inside = identity
                .login_ip()
                .is_some_and(|ip| self.ips.iter().any(|prefix| prefix.contains(ip)));
            if !inside {
                return (false, 0);
            }
            weight += WEIGHT_IP;
        }
        (true, weight)
    }
}

/// Every policy that matches `identity` at the highest weight.
pub fn get_matched_policies<'a, I, P>(policies: P, identity: &I) -> Vec<&'a RbacPolicy>
where
    I: RbacIdentity + ?Sized,
    P: IntoIterator<Item = &'a RbacPolicy>,
{
    let mut best = Vec::new();
    let mut max = 0;
    for policy in policies {
        let (matched, weight) = policy.matches(identity);
        if !matched {
            continue;
        }
        if best.is_empty() || weight > max {
            best.clear();
            max = weight;
        } else if weight < max {
            continue;
        }
        best.push(policy);
    }
    tracing::trace!(
        matched = best.len(),
        weight = max,
        domain = identity.domain_id(),
        "selected policies for identity"
    );
    best
}
