//! Rule matching with wildcard levels and specificity scoring.
//!
//! A [`Rule`] maps a `(service, resource, action, extra...)` tuple to an
//! [`Effect`]. Any level may be a wildcard (`""` or `"*"`). When several rules
//! match a request, [`get_match_rule`] picks the most specific one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The wildcard marker written by the engine.
pub const WILDCARD: &str = "*";

/// Whether a rule token is the wildcard marker (`""` or `"*"`).
pub fn is_wildcard(token: &str) -> bool {
    token.is_empty() || token == WILDCARD
}

/// The effect of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// The action is allowed.
    Allow,
    /// The action is denied.
    Deny,
}

impl Effect {
    /// The stricter of two effects.
    pub fn stricter(self, other: Effect) -> Effect {
        if self == Effect::Deny || other == Effect::Deny {
            Effect::Deny
        } else {
            Effect::Allow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring one rule against one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleMatch {
    pub matched: bool,
    /// Number of non-wildcard levels that matched.
    pub specificity: u32,
    /// Level-weighted score: service 1, resource 10, action 100, extra[i] 1000*(i+1).
    pub weight: u64,
}

/// A single policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub service: String,
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
    pub result: Effect,
}

impl Rule {
    /// Create a rule on `service` with every deeper level wildcarded.
    pub fn new(service: &str, result: Effect) -> Self {
        Self {
            service: service.to_string(),
            resource: WILDCARD.to_string(),
            action: WILDCARD.to_string(),
            extra: Vec::new(),
            result,
        }
    }

    /// Create a new Allow rule.
    pub fn allow(service: &str, resource: &str, action: &str) -> Self {
        Self::new(service, Effect::Allow)
            .with_resource(resource)
            .with_action(action)
    }

    /// Create a new Deny rule.
    pub fn deny(service: &str, resource: &str, action: &str) -> Self {
        Self::new(service, Effect::Deny)
            .with_resource(resource)
            .with_action(action)
    }

    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = resource.to_string();
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = action.to_string();
        self
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra = extra.into_iter().map(Into::into).collect();
        self
    }

    /// The rule's levels in matching order: service, resource, action, extra...
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        [
            self.service.as_str(),
            self.resource.as_str(),
            self.action.as_str(),
        ]
        .into_iter()
        .chain(self.extra.iter().map(String::as_str))
    }

    /// Score this rule against a request.
    pub fn matches(&self, service: &str, resource: &str, action: &str, extra: &[&str]) -> RuleMatch {
        let mut result = RuleMatch {
            matched: true,
            ..RuleMatch::default()
        };

        let fixed = [
            (self.service.as_str(), service, 1),
            (self.resource.as_str(), resource, 10),
            (self.action.as_str(), action, 100),
        ];
        let extras = self
            .extra
            .iter()
            .zip(extra)
            .enumerate()
            .map(|(i, (rule, req))| (rule.as_str(), *req, 1000 * (i as u64 + 1)));

        for (rule, req, weight) in fixed.into_iter().chain(extras) {
            if is_wildcard(rule) {
                continue;
            }
            if rule != req {
                return RuleMatch::default();
            }
            result.specificity += 1;
            result.weight += weight;
        }
        result
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<&str> = self
            .levels()
            .map(|l| if is_wildcard(l) { WILDCARD } else { l })
            .collect();
        write!(f, "{} => {}", levels.join("/"), self.result)
    }
}

/// Find the rule that decides a request.
///
/// Highest specificity wins; ties go to the lower weight, then to Deny.
/// `None` means no rule matched, which callers treat as Deny.
pub fn get_match_rule<'a>(
    rules: &'a [Rule],
    service: &str,
    resource: &str,
    action: &str,
    extra: &[&str],
) -> Option<&'a Rule> {
    let mut best: Option<(&Rule, RuleMatch)> = None;
    for rule in rules {
        let m = rule.matches(service, resource, action, extra);
        if !m.matched {
            continue;
        }
        let better = match &best {
            None => true,
            Some((cur, cm)) => {
                m.specificity > cm.specificity
                    || (m.specificity == cm.specificity && m.weight < cm.weight)
                    || (m.specificity == cm.specificity
                        && m.weight == cm.weight
                        && rule.result == Effect::Deny
                        && cur.result == Effect::Allow)
            }
        };
        if better {
            best = Some((rule, m));
        }
    }

    let rule = best.map(|(rule, _)| rule);
    match rule {
        Some(rule) => tracing::trace!(%rule, service, resource, action, ?extra, "matched rule"),
        None => tracing::trace!(service, resource, action, ?extra, "no rule matched"),
    }
    rule
}
