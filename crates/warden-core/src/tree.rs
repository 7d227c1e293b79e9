//! Wildcard tree form of a rule set.
//!
//! Policy documents store rules as a nested mapping: service, then resource,
//! then action, then extra levels, with `"*"` for the wildcard branch and
//! `"allow"` / `"deny"` at the leaves. [`PolicyTree`] converts between that
//! form and a flat rule list, and [`PolicyTree::reduce`] folds redundant
//! branches into their wildcard.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{PolicyError, Result};
use crate::rule::{Effect, Rule, WILDCARD, is_wildcard};

/// Index of a node in the tree arena.
pub type NodeId = usize;

const ROOT: NodeId = 0;

/// Depth of the children that name actions.
const ACTION_DEPTH: usize = 2;

/// The closed vocabulary of actions.
pub const CANONICAL_ACTIONS: [&str; 6] = ["create", "delete", "get", "list", "perform", "update"];

/// Result strings from the multi-level privilege model, decoded as Allow.
const LEGACY_ALLOW: [&str; 4] = ["admin", "owner", "user", "guest"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Branch {
    wildcard: Option<NodeId>,
    named: BTreeMap<String, NodeId>,
}

impl Branch {
    fn is_empty(&self) -> bool {
        self.wildcard.is_none() && self.named.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Leaf(Effect),
    Branch(Branch),
}

/// Arena-backed wildcard tree.
#[derive(Debug, Clone)]
pub struct PolicyTree {
    nodes: Vec<Node>,
}

impl Default for PolicyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Branch(Branch::default())],
        }
    }

    pub fn from_rules<'a, I: IntoIterator<Item = &'a Rule>>(rules: I) -> Self {
        let mut tree = Self::new();
        for rule in rules {
            tree.add_rule(rule);
        }
        tree
    }

    /// Whether the tree holds no rule at all.
    pub fn is_empty(&self) -> bool {
        matches!(&self.nodes[ROOT], Node::Branch(b) if b.is_empty())
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn leaf(&self, id: NodeId) -> Option<Effect> {
        match self.nodes[id] {
            Node::Leaf(effect) => Some(effect),
            Node::Branch(_) => None,
        }
    }

    /// Turn a leaf into a branch whose wildcard child carries the old effect.
    fn branch_mut(&mut self, id: NodeId) -> &mut Branch {
        if let Node::Leaf(effect) = self.nodes[id] {
            let child = self.push(Node::Leaf(effect));
            self.nodes[id] = Node::Branch(Branch {
                wildcard: Some(child),
                named: BTreeMap::new(),
            });
        }
        match &mut self.nodes[id] {
            Node::Branch(branch) => branch,
            Node::Leaf(_) => unreachable!("leaf pushed down above"),
        }
    }

    fn child_or_insert(&mut self, parent: NodeId, token: &str) -> NodeId {
        self.branch_mut(parent);
        let next = self.nodes.len();
        let branch = self.branch_mut(parent);
        let (id, created) = if is_wildcard(token) {
            match branch.wildcard {
                Some(id) => (id, false),
                None => {
                    branch.wildcard = Some(next);
                    (next, true)
                }
            }
        } else {
            match branch.named.get(token) {
                Some(&id) => (id, false),
                None => {
                    branch.named.insert(token.to_string(), next);
                    (next, true)
                }
            }
        };
        if created {
            self.nodes.push(Node::Branch(Branch::default()));
        }
        id
    }

    /// Store `effect` at `id`, or on its wildcard chain if `id` has children.
    fn set_effect(&mut self, mut id: NodeId, effect: Effect) {
        loop {
            match &self.nodes[id] {
                Node::Leaf(current) => {
                    let merged = current.stricter(effect);
                    self.nodes[id] = Node::Leaf(merged);
                    return;
                }
                Node::Branch(branch) if branch.is_empty() => {
                    self.nodes[id] = Node::Leaf(effect);
                    return;
                }
                Node::Branch(branch) => {
                    if let Some(wildcard) = branch.wildcard {
                        id = wildcard;
                        continue;
                    }
                    let leaf = self.push(Node::Leaf(effect));
                    self.branch_mut(id).wildcard = Some(leaf);
                    return;
                }
            }
        }
    }

    /// Insert one rule. Conflicting effects on the same path resolve to Deny.
    pub fn add_rule(&mut self, rule: &Rule) {
        let mut levels: Vec<&str> = rule.levels().collect();
        while levels.last().is_some_and(|l| is_wildcard(l)) {
            levels.pop();
        }
        let mut node = ROOT;
        for token in levels {
            node = self.child_or_insert(node, token);
        }
        self.set_effect(node, rule.result);
    }

    /// Fold named children into the wildcard branch where no answer changes,
    /// then drop the nodes that are no longer reachable. Idempotent.
    ///
    /// A fold is skipped when a rule outside the branch can match a request
    /// inside it, since that rule's contest with the folded leaf may turn out
    /// differently.
    pub fn reduce(&mut self) {
        self.reduce_node(ROOT, &mut Vec::new());
        self.compact();
    }

    fn reduce_node(&mut self, id: NodeId, path: &mut Vec<String>) {
        let Node::Branch(branch) = &self.nodes[id] else {
            return;
        };
        let children: Vec<(String, NodeId)> = branch
            .wildcard
            .map(|c| (WILDCARD.to_string(), c))
            .into_iter()
            .chain(branch.named.iter().map(|(name, &c)| (name.clone(), c)))
            .collect();
        for (token, child) in children {
            path.push(token);
            self.reduce_node(child, path);
            path.pop();
        }

        let Node::Branch(branch) = &self.nodes[id] else {
            return;
        };
        let mut branch = branch.clone();
        let prefix: Vec<&str> = path.iter().map(String::as_str).collect();
        match branch.wildcard {
            Some(wildcard) => {
                if let Some(effect) = self.leaf(wildcard) {
                    branch.named.retain(|name, c| {
                        if self.leaf(*c) != Some(effect) {
                            return true;
                        }
                        let mut child_path = prefix.clone();
                        child_path.push(name);
                        self.overlaps_outside(id, &child_path)
                    });
                }
            }
            None => {
                if let Some(effect) = self.collapsible(&branch, prefix.len())
                    && !self.overlaps_outside(id, &prefix)
                {
                    branch.named.retain(|_, c| self.leaf(*c) != Some(effect));
                    branch.wildcard = Some(self.push(Node::Leaf(effect)));
                }
            }
        }

        let flattened = match branch.wildcard {
            Some(wildcard) if branch.named.is_empty() => self.leaf(wildcard),
            _ => None,
        };
        self.nodes[id] = match flattened {
            Some(effect) => Node::Leaf(effect),
            None => Node::Branch(branch),
        };
    }

    /// The majority effect among named leaf children, if it may become the
    /// wildcard of a branch at `depth`.
    ///
    /// Requests naming no child of the branch are denied before the fold, so
    /// extra levels only fold a Deny majority. The action level folds either
    /// effect once every canonical action is named.
    fn collapsible(&self, branch: &Branch, depth: usize) -> Option<Effect> {
        let (mut allow, mut deny) = (0usize, 0usize);
        for &child in branch.named.values() {
            match self.leaf(child) {
                Some(Effect::Allow) => allow += 1,
                Some(Effect::Deny) => deny += 1,
                None => {}
            }
        }
        let (effect, count) = if allow > deny {
            (Effect::Allow, allow)
        } else {
            (Effect::Deny, deny)
        };

        let ok = match depth {
            ACTION_DEPTH => CANONICAL_ACTIONS.iter().all(|action| {
                branch
                    .named
                    .get(*action)
                    .is_some_and(|&c| self.leaf(c).is_some())
            }),
            d if d > ACTION_DEPTH => effect == Effect::Deny && count >= 2,
            _ => false,
        };
        ok.then_some(effect)
    }

    /// Whether a rule outside the subtree at `skip` matches some request
    /// under `path`.
    fn overlaps_outside(&self, skip: NodeId, path: &[&str]) -> bool {
        self.overlaps_from(ROOT, 0, skip, path)
    }

    fn overlaps_from(&self, id: NodeId, level: usize, skip: NodeId, path: &[&str]) -> bool {
        if id == skip {
            return false;
        }
        let Node::Branch(branch) = &self.nodes[id] else {
            return true;
        };
        let compatible = |token: &str| match path.get(level) {
            Some(want) => is_wildcard(token) || is_wildcard(want) || token == *want,
            None => true,
        };
        branch
            .wildcard
            .map(|c| (WILDCARD, c))
            .into_iter()
            .chain(branch.named.iter().map(|(name, &c)| (name.as_str(), c)))
            .any(|(token, child)| compatible(token) && self.overlaps_from(child, level + 1, skip, path))
    }

    /// Rebuild the arena with only the nodes reachable from the root.
    fn compact(&mut self) {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        self.copy_reachable(ROOT, &mut nodes);
        self.nodes = nodes;
    }

    fn copy_reachable(&self, id: NodeId, out: &mut Vec<Node>) -> NodeId {
        let new_id = out.len();
        out.push(Node::Branch(Branch::default()));
        let node = match &self.nodes[id] {
            Node::Leaf(effect) => Node::Leaf(*effect),
            Node::Branch(branch) => Node::Branch(Branch {
                wildcard: branch.wildcard.map(|c| self.copy_reachable(c, out)),
                named: branch
                    .named
                    .iter()
                    .map(|(name, &c)| (name.clone(), self.copy_reachable(c, out)))
                    .collect(),
            }),
        };
        out[new_id] = node;
        new_id
    }

    /// Walk the tree back into a flat rule list.
    pub fn rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();
        self.collect_rules(ROOT, &mut Vec::new(), &mut rules);
        rules
    }

    fn collect_rules<'a>(&'a self, id: NodeId, path: &mut Vec<&'a str>, out: &mut Vec<Rule>) {
        match &self.nodes[id] {
            Node::Leaf(effect) => out.push(rule_from_path(path, *effect)),
            Node::Branch(branch) => {
                if let Some(wildcard) = branch.wildcard {
                    path.push(WILDCARD);
                    self.collect_rules(wildcard, path, out);
                    path.pop();
                }
                for (name, &child) in &branch.named {
                    path.push(name);
                    self.collect_rules(child, path, out);
                    path.pop();
                }
            }
        }
    }

    /// Render the tree as a policy document body.
    pub fn to_value(&self) -> Value {
        match self.nodes[ROOT] {
            Node::Leaf(effect) => {
                let mut map = Map::new();
                map.insert(WILDCARD.to_string(), Value::from(effect.as_str()));
                Value::Object(map)
            }
            Node::Branch(_) => self.node_value(ROOT),
        }
    }

    fn node_value(&self, id: NodeId) -> Value {
        match &self.nodes[id] {
            Node::Leaf(effect) => Value::from(effect.as_str()),
            Node::Branch(branch) => {
                let mut map = Map::new();
                if let Some(wildcard) = branch.wildcard {
                    map.insert(WILDCARD.to_string(), self.node_value(wildcard));
                }
                for (name, &child) in &branch.named {
                    map.insert(name.clone(), self.node_value(child));
                }
                Value::Object(map)
            }
        }
    }

    /// Parse a policy document body.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut rules = Vec::new();
        decode_node(value, &mut Vec::new(), &mut rules)?;
        if rules.is_empty() {
            return Err(PolicyError::EmptyPolicy);
        }
        tracing::debug!(rules = rules.len(), "decoded policy tree");
        Ok(Self::from_rules(&rules))
    }
}

/// Parse a result string. Legacy privilege levels decode as Allow.
pub fn parse_effect(value: &str) -> Option<Effect> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "allow" => Some(Effect::Allow),
        "deny" => Some(Effect::Deny),
        legacy if LEGACY_ALLOW.contains(&legacy) => {
            tracing::debug!(result = legacy, "legacy privilege level decoded as allow");
            Some(Effect::Allow)
        }
        _ => None,
    }
}

fn decode_node<'a>(value: &'a Value, path: &mut Vec<&'a str>, out: &mut Vec<Rule>) -> Result<()> {
    match value {
        Value::String(s) => {
            let effect = parse_effect(s).ok_or_else(|| PolicyError::UnknownResult {
                path: path.join("."),
                value: s.clone(),
            })?;
            out.push(rule_from_path(path, effect));
            Ok(())
        }
        Value::Object(map) => {
            for (key, child) in map {
                path.push(if is_wildcard(key) { WILDCARD } else { key.as_str() });
                decode_node(child, path, out)?;
                path.pop();
            }
            Ok(())
        }
        other => Err(PolicyError::MalformedNode {
            path: path.join("."),
            found: json_type(other),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

fn rule_from_path(path: &[&str], effect: Effect) -> Rule {
    let mut levels = path.to_vec();
    while levels.len() > 3 && levels.last().is_some_and(|l| is_wildcard(l)) {
        levels.pop();
    }
    let level = |i: usize| levels.get(i).copied().unwrap_or(WILDCARD);
    Rule::new(level(0), effect)
        .with_resource(level(1))
        .with_action(level(2))
        .with_extra(levels.iter().skip(3).copied())
}

/// Build, reduce and render a rule set.
pub fn encode_rules(rules: &[Rule]) -> Value {
    let mut tree = PolicyTree::from_rules(rules);
    tree.reduce();
    tree.to_value()
}

/// Decode a policy document body into a flat rule list.
pub fn decode_rules(value: &Value) -> Result<Vec<Rule>> {
    Ok(PolicyTree::from_value(value)?.rules())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::get_match_rule;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sorted(rules: Vec<Rule>) -> Vec<String> {
        let mut out: Vec<String> = rules.iter().map(Rule::to_string).collect();
        out.sort();
        out
    }

    #[test]
    fn test_encode_simple_rules() {
        let rules = vec![
            Rule::new("compute", Effect::Allow),
            Rule::deny("compute", "servers", "delete"),
        ];
        assert_eq!(
            encode_rules(&rules),
            json!({"compute": {"*": "allow", "servers": {"delete": "deny"}}})
        );
    }

    #[test]
    fn test_root_leaf_renders_under_wildcard() {
        let rules = vec![Rule::allow("*", "*", "*")];
        assert_eq!(encode_rules(&rules), json!({"*": "allow"}));
    }

    #[test]
    fn test_leaf_pushed_down_by_deeper_rule() {
        let mut tree = PolicyTree::new();
        tree.add_rule(&Rule::new("compute", Effect::Allow));
        tree.add_rule(&Rule::deny("compute", "servers", "*"));
        assert_eq!(
            sorted(tree.rules()),
            vec!["compute/*/* => allow", "compute/servers/* => deny"]
        );
    }

    #[test]
    fn test_rule_ending_on_branch_sets_wildcard_chain() {
        let mut tree = PolicyTree::new();
        tree.add_rule(&Rule::deny("compute", "servers", "list"));
        tree.add_rule(&Rule::new("compute", Effect::Allow));
        assert_eq!(
            tree.to_value(),
            json!({"compute": {"*": "allow", "servers": {"list": "deny"}}})
        );
    }

    #[test]
    fn test_conflict_resolves_to_deny() {
        let tree = PolicyTree::from_rules(&[
            Rule::allow("compute", "servers", "list"),
            Rule::deny("compute", "servers", "list"),
        ]);
        assert_eq!(sorted(tree.rules()), vec!["compute/servers/list => deny"]);
    }

    #[test]
    fn test_reduce_prunes_redundant_named_children() {
        let rules = vec![
            Rule::allow("compute", "servers", "*"),
            Rule::allow("compute", "servers", "list"),
            Rule::deny("compute", "servers", "delete"),
        ];
        assert_eq!(
            encode_rules(&rules),
            json!({"compute": {"servers": {"*": "allow", "delete": "deny"}}})
        );
    }

    #[test]
    fn test_reduce_collapses_complete_action_set() {
        let mut rules: Vec<Rule> = CANONICAL_ACTIONS
            .iter()
            .map(|a| Rule::allow("compute", "servers", a))
            .collect();
        rules[1] = Rule::deny("compute", "servers", "delete");
        assert_eq!(
            encode_rules(&rules),
            json!({"compute": {"servers": {"*": "allow", "delete": "deny"}}})
        );

        let uniform: Vec<Rule> = CANONICAL_ACTIONS
            .iter()
            .map(|a| Rule::allow("compute", "servers", a))
            .collect();
        assert_eq!(encode_rules(&uniform), json!({"compute": {"servers": "allow"}}));
    }

    #[test]
    fn test_reduce_keeps_incomplete_action_set() {
        let rules = vec![
            Rule::allow("compute", "servers", "list"),
            Rule::allow("compute", "servers", "get"),
        ];
        assert_eq!(
            encode_rules(&rules),
            json!({"compute": {"servers": {"get": "allow", "list": "allow"}}})
        );
    }

    #[test]
    fn test_reduce_never_collapses_services_or_resources() {
        let rules = vec![
            Rule::new("compute", Effect::Allow),
            Rule::new("image", Effect::Allow),
            Rule::new("identity", Effect::Allow),
        ];
        assert_eq!(
            encode_rules(&rules),
            json!({"compute": "allow", "identity": "allow", "image": "allow"})
        );
    }

    #[test]
    fn test_reduce_extra_level_needs_two_children() {
        let one = vec![Rule::deny("compute", "servers", "perform").with_extra(["start"])];
        assert_eq!(
            encode_rules(&one),
            json!({"compute": {"servers": {"perform": {"start": "deny"}}}})
        );

        let two = vec![
            Rule::allow("compute", "servers", "perform").with_extra(["start"]),
            Rule::deny("compute", "servers", "perform").with_extra(["stop"]),
            Rule::deny("compute", "servers", "perform").with_extra(["migrate"]),
        ];
        assert_eq!(
            encode_rules(&two),
            json!({"compute": {"servers": {"perform": {"*": "deny", "start": "allow"}}}})
        );
    }

    #[test]
    fn test_reduce_never_widens_allow_at_extra_levels() {
        let rules = vec![
            Rule::allow("compute", "servers", "perform").with_extra(["start"]),
            Rule::allow("compute", "servers", "perform").with_extra(["stop"]),
            Rule::deny("compute", "servers", "perform").with_extra(["migrate"]),
        ];
        let decoded = decode_rules(&encode_rules(&rules)).unwrap();
        assert!(get_match_rule(&decoded, "compute", "servers", "perform", &["reboot"]).is_none());
        assert_eq!(sorted(decoded), sorted(rules));
    }

    #[test_log::test]
    fn test_reduce_keeps_child_contested_from_wildcard_branch() {
        let rules = vec![
            Rule::deny("compute", "*", "*"),
            Rule::deny("compute", "servers", "*"),
            Rule::allow("*", "servers", "list"),
        ];
        let encoded = encode_rules(&rules);
        assert_eq!(
            encoded,
            json!({
                "*": {"servers": {"list": "allow"}},
                "compute": {"*": "deny", "servers": "deny"}
            })
        );
        let decoded = decode_rules(&encoded).unwrap();
        let decide = |rules: &[Rule]| get_match_rule(rules, "compute", "servers", "list", &[]).map(|r| r.result);
        assert_eq!(decide(&decoded), Some(Effect::Deny));
        assert_eq!(decide(&decoded), decide(&rules));

        let mirrored = vec![
            Rule::allow("compute", "*", "*"),
            Rule::allow("compute", "servers", "*"),
            Rule::deny("*", "servers", "list"),
        ];
        assert_eq!(decide(&mirrored), Some(Effect::Allow));
        let decoded = decode_rules(&encode_rules(&mirrored)).unwrap();
        assert_eq!(decide(&decoded), Some(Effect::Allow));
    }

    #[test]
    fn test_reduce_skips_collapse_reached_from_outside() {
        let mut rules: Vec<Rule> = CANONICAL_ACTIONS
            .iter()
            .map(|a| Rule::deny("compute", "servers", a))
            .collect();
        rules.push(Rule::allow("*", "*", "start"));
        let encoded = encode_rules(&rules);
        assert_eq!(encoded["compute"]["servers"].as_object().map(|m| m.len()), Some(6));
        let decoded = decode_rules(&encoded).unwrap();
        assert_eq!(
            get_match_rule(&decoded, "compute", "servers", "start", &[]).map(|r| r.result),
            Some(Effect::Allow)
        );
    }

    #[test]
    fn test_reduce_drops_unreachable_nodes() {
        let mut rules: Vec<Rule> = CANONICAL_ACTIONS
            .iter()
            .map(|a| Rule::allow("compute", "servers", a))
            .collect();
        rules.push(Rule::allow("image", "images", "*"));
        rules.push(Rule::allow("image", "images", "list"));
        let mut tree = PolicyTree::from_rules(&rules);
        tree.reduce();
        // root, compute, servers leaf, image, images leaf
        assert_eq!(tree.nodes.len(), 5);
        tree.reduce();
        assert_eq!(tree.nodes.len(), 5);
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let rules = vec![
            Rule::new("compute", Effect::Allow),
            Rule::deny("compute", "servers", "delete"),
            Rule::allow("compute", "servers", "perform").with_extra(["start"]),
            Rule::allow("compute", "servers", "perform").with_extra(["stop"]),
        ];
        let mut tree = PolicyTree::from_rules(&rules);
        tree.reduce();
        let once = tree.to_value();
        tree.reduce();
        assert_eq!(tree.to_value(), once);
    }

    #[test]
    fn test_decode_round_trip() {
        let doc = json!({"compute": {"*": "allow", "servers": {"delete": "deny"}}, "image": "allow"});
        let rules = decode_rules(&doc).unwrap();
        assert_eq!(
            sorted(rules.clone()),
            vec![
                "compute/*/* => allow",
                "compute/servers/delete => deny",
                "image/*/* => allow",
            ]
        );
        assert_eq!(encode_rules(&rules), doc);
    }

    #[test]
    fn test_decode_empty_key_is_wildcard() {
        let rules = decode_rules(&json!({"": {"servers": {"list": "allow"}}})).unwrap();
        assert_eq!(sorted(rules), vec!["*/servers/list => allow"]);
    }

    #[test_log::test]
    fn test_decode_legacy_levels_as_allow() {
        let doc = json!({"compute": "Admin", "image": "guest", "identity": "DENY"});
        let rules = decode_rules(&doc).unwrap();
        assert_eq!(
            sorted(rules),
            vec![
                "compute/*/* => allow",
                "identity/*/* => deny",
                "image/*/* => allow",
            ]
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = decode_rules(&json!({"compute": {"servers": 3}})).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::MalformedNode { ref path, found: "a number" } if path == "compute.servers"
        ));

        let err = decode_rules(&json!({"compute": "maybe"})).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownResult { .. }));

        let err = decode_rules(&json!({})).unwrap_err();
        assert!(matches!(err, PolicyError::EmptyPolicy));

        let err = decode_rules(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedNode { .. }));
    }

    #[test]
    fn test_bare_string_document_is_root_leaf() {
        let rules = decode_rules(&json!("deny")).unwrap();
        assert_eq!(sorted(rules), vec!["*/*/* => deny"]);
    }
}
