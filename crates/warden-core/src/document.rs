//! Decoding and encoding whole policy documents.
//!
//! A document is either a bare policy tree, or a mapping with the tree under
//! `"policy"` and optional `domain_tags`, `project_tags` and `object_tags`
//! lists next to it:
//!
//! ```json
//! {
//!   "policy": {"compute": {"*": "allow", "servers": {"delete": "deny"}}},
//!   "project_tags": [{"env": "dev"}]
//! }
//! ```

use serde_json::{Map, Value};

use crate::error::Result;
use crate::policy::{RuleSet, ScopedPolicy};
use crate::tagset::TagSetList;
use crate::tree::{PolicyTree, encode_rules};

const POLICY_KEY: &str = "policy";
const DOMAIN_TAGS_KEY: &str = "domain_tags";
const PROJECT_TAGS_KEY: &str = "project_tags";
const OBJECT_TAGS_KEY: &str = "object_tags";

/// Decode a document in either form.
///
/// A mapping is the wrapped form only if `"policy"` holds a mapping and every
/// other key is a tag list; anything else is a bare tree, even one with a
/// service named `policy`.
pub fn decode_policy_document(value: &Value) -> Result<ScopedPolicy> {
    match wrapped_tree(value) {
        Some((map, tree)) => decode_policy_data(
            map.get(DOMAIN_TAGS_KEY),
            map.get(PROJECT_TAGS_KEY),
            map.get(OBJECT_TAGS_KEY),
            tree,
        ),
        None => decode_policy_data(None, None, None, value),
    }
}

fn wrapped_tree(value: &Value) -> Option<(&Map<String, Value>, &Value)> {
    let map = value.as_object()?;
    let tree = map.get(POLICY_KEY).filter(|tree| tree.is_object())?;
    map.keys()
        .all(|key| {
            matches!(
                key.as_str(),
                POLICY_KEY | DOMAIN_TAGS_KEY | PROJECT_TAGS_KEY | OBJECT_TAGS_KEY
            )
        })
        .then_some((map, tree))
}

/// Decode a tree plus its separately stored tag lists.
pub fn decode_policy_data(
    domain: Option<&Value>,
    project: Option<&Value>,
    object: Option<&Value>,
    tree: &Value,
) -> Result<ScopedPolicy> {
    let rules = PolicyTree::from_value(tree)?.rules();
    Ok(ScopedPolicy::new(RuleSet::new(rules))
        .with_domain_tags(decode_tags(domain)?)
        .with_project_tags(decode_tags(project)?)
        .with_object_tags(decode_tags(object)?))
}

fn decode_tags(value: Option<&Value>) -> Result<TagSetList> {
    match value {
        None | Some(Value::Null) => Ok(TagSetList::new()),
        Some(v) => Ok(serde_json::from_value(v.clone())?),
    }
}

/// Encode a policy as a wrapped document with its reduced tree.
pub fn encode_policy_document(policy: &ScopedPolicy) -> Result<Value> {
    let mut map = Map::new();
    map.insert(POLICY_KEY.to_string(), encode_rules(policy.rules.as_slice()));
    for (key, tags) in [
        (DOMAIN_TAGS_KEY, &policy.domain_tags),
        (PROJECT_TAGS_KEY, &policy.project_tags),
        (OBJECT_TAGS_KEY, &policy.object_tags),
    ] {
        if !tags.is_empty() {
            map.insert(key.to_string(), serde_json::to_value(tags)?);
        }
    }
    Ok(Value::Object(map))
}
