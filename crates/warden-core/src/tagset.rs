//! Tag-set algebra used to scope an allowance to domains, projects or objects.
//!
//! A [`TagSet`] is a conjunction of `key=value` constraints kept sorted by
//! `(key, value)`. Two values are reserved: [`ANY_VALUE`] (the key is present
//! with any value) and [`NO_VALUE`] (the key must be absent). A
//! [`TagSetList`] is a disjunction of tag sets kept as a minimal antichain;
//! the empty list means "unconstrained".

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Tag value meaning "this key, any value".
pub const ANY_VALUE: &str = "";

/// Tag value meaning "this key must be absent".
pub const NO_VALUE: &str = "___no_value__";

/// A single `key=value` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `key` with an unconstrained value.
    pub fn any(key: impl Into<String>) -> Self {
        Self::new(key, ANY_VALUE)
    }

    /// `key` must be absent.
    pub fn none(key: impl Into<String>) -> Self {
        Self::new(key, NO_VALUE)
    }

    pub fn is_any(&self) -> bool {
        self.value == ANY_VALUE
    }

    pub fn is_none(&self) -> bool {
        self.value == NO_VALUE
    }

    // ANY_VALUE sorts first and NO_VALUE last within a key.
    fn value_rank(&self) -> (u8, &str) {
        if self.is_any() {
            (0, "")
        } else if self.is_none() {
            (2, "")
        } else {
            (1, self.value.as_str())
        }
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.value_rank().cmp(&other.value_rank()))
    }
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "{}", self.key)
        } else if self.is_none() {
            write!(f, "!{}", self.key)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// A sorted conjunction of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "TagSetRaw", into = "Vec<Tag>")]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Builder form of [`append`](Self::append).
    pub fn with<I: IntoIterator<Item = Tag>>(mut self, tags: I) -> Self {
        self.append(tags);
        self
    }

    /// Insert tags, keeping the set sorted and normalized.
    ///
    /// An [`ANY_VALUE`] tag absorbs every concrete value of its key; it
    /// cancels with a [`NO_VALUE`] tag of the same key, removing the key.
    pub fn append<I: IntoIterator<Item = Tag>>(&mut self, tags: I) {
        for tag in tags {
            self.add(tag);
        }
    }

    fn add(&mut self, tag: Tag) {
        let pos = match self.tags.binary_search(&tag) {
            Ok(_) => return,
            Err(pos) => pos,
        };
        let range = self.key_range(&tag.key);
        let has_any = self.tags[range.clone()].first().is_some_and(Tag::is_any);
        let has_none = self.tags[range.clone()].last().is_some_and(Tag::is_none);

        if tag.is_any() {
            if has_none {
                self.tags.drain(range);
            } else {
                self.tags.splice(range, [tag]);
            }
        } else if tag.is_none() {
            if has_any {
                self.tags.drain(range);
            } else {
                self.tags.insert(pos, tag);
            }
        } else if !has_any {
            self.tags.insert(pos, tag);
        }
    }

    fn key_range(&self, key: &str) -> std::ops::Range<usize> {
        let start = self.tags.partition_point(|t| t.key.as_str() < key);
        let end = self.tags.partition_point(|t| t.key.as_str() <= key);
        start..end
    }

    /// Whether every constraint of `other` is admitted by `self`.
    ///
    /// An empty set contains everything. Otherwise both sets must constrain
    /// the same keys and each tag of `other` must appear in `self` verbatim
    /// or be covered by an [`ANY_VALUE`] tag of the same key.
    pub fn contains(&self, other: &TagSet) -> bool {
        if self.is_empty() {
            return true;
        }
        let (mut i, mut j) = (0, 0);
        while i < self.tags.len() && j < other.tags.len() {
            let key = self.tags[i].key.as_str();
            if other.tags[j].key != key {
                return false;
            }
            let mine = self.key_range(key);
            let theirs = other.key_range(key);
            let any = self.tags[mine.start].is_any();
            let group = &self.tags[mine.clone()];
            let covered = other.tags[theirs.clone()]
                .iter()
                .all(|t| group.binary_search(t).is_ok() || (any && !t.is_none()));
            if !covered {
                return false;
            }
            i = mine.end;
            j = theirs.end;
        }
        i == self.tags.len() && j == other.tags.len()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        TagSet::new().with(iter)
    }
}

impl From<TagSet> for Vec<Tag> {
    fn from(set: TagSet) -> Self {
        set.tags
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.tags.iter().map(Tag::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// Parses `key=value,key2,!key3`: a bare key is [`ANY_VALUE`], a `!` prefix
/// is [`NO_VALUE`].
impl FromStr for TagSet {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = TagSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let tag = if let Some(key) = part.strip_prefix('!') {
                Tag::none(key.trim())
            } else if let Some((key, value)) = part.split_once('=') {
                Tag::new(key.trim(), value.trim())
            } else {
                Tag::any(part)
            };
            if tag.key.is_empty() {
                return Err(PolicyError::InvalidTag(s.to_string()));
            }
            set.add(tag);
        }
        Ok(set)
    }
}

/// Accepted wire forms: `[{"key": .., "value": ..}]` or `{"key": "value"}`,
/// where a mapping value may also be a list of values.
#[derive(Deserialize)]
#[serde(untagged)]
enum TagSetRaw {
    Seq(Vec<Tag>),
    Map(BTreeMap<String, OneOrMany>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<TagSetRaw> for TagSet {
    fn from(raw: TagSetRaw) -> Self {
        match raw {
            TagSetRaw::Seq(tags) => tags.into_iter().collect(),
            TagSetRaw::Map(map) => map
                .into_iter()
                .flat_map(|(key, values)| {
                    let values = match values {
                        OneOrMany::One(v) => vec![v],
                        OneOrMany::Many(vs) => vs,
                    };
                    values.into_iter().map(move |v| Tag::new(key.clone(), v))
                })
                .collect(),
        }
    }
}

/// A disjunction of tag sets kept as a minimal antichain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TagSet>", into = "Vec<TagSet>")]
pub struct TagSetList {
    sets: Vec<TagSet>,
}

impl TagSetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TagSet> {
        self.sets.iter()
    }

    /// No disjunct restricts anything.
    pub fn is_unconstrained(&self) -> bool {
        self.sets.is_empty() || self.sets.iter().any(TagSet::is_empty)
    }

    /// The disjuncts in sorted order, for order-insensitive comparison.
    pub fn sorted(&self) -> Vec<TagSet> {
        let mut sets = self.sets.clone();
        sets.sort();
        sets
    }

    /// Builder form of [`append`](Self::append).
    pub fn with(mut self, set: TagSet) -> Self {
        self.append(set);
        self
    }

    /// Add a disjunct unless an existing one contains it; disjuncts it
    /// contains are dropped.
    pub fn append(&mut self, set: TagSet) {
        if self.sets.iter().any(|s| s.contains(&set)) {
            return;
        }
        self.sets.retain(|s| !set.contains(s));
        self.sets.push(set);
    }

    /// Conjunction with a single tag set.
    pub fn intersect(&self, set: &TagSet) -> TagSetList {
        self.intersect_list(&TagSetList::new().with(set.clone()))
    }

    /// Conjunction of two disjunctions: the pairwise union of their disjuncts.
    ///
    /// An empty (unconstrained) operand yields the other operand.
    pub fn intersect_list(&self, other: &TagSetList) -> TagSetList {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut out = TagSetList::new();
        for a in &self.sets {
            for b in &other.sets {
                out.append(a.clone().with(b.iter().cloned()));
            }
        }
        out
    }

    /// Whether every disjunct of `other` is contained by some disjunct of `self`.
    pub fn contains_all(&self, other: &TagSetList) -> bool {
        if self.is_unconstrained() {
            return true;
        }
        if other.is_unconstrained() {
            return false;
        }
        other
            .sets
            .iter()
            .all(|b| self.sets.iter().any(|a| a.contains(b)))
    }

    /// The most specific disjunct, by length then containment.
    ///
    /// For display only; decisions must use the full list.
    pub fn flatten(&self) -> TagSet {
        let mut best: Option<&TagSet> = None;
        for set in &self.sets {
            best = match best {
                None => Some(set),
                Some(cur) if set.len() > cur.len() => Some(set),
                Some(cur) if set.len() == cur.len() && cur.contains(set) => Some(set),
                keep => keep,
            };
        }
        best.cloned().unwrap_or_default()
    }
}

impl From<Vec<TagSet>> for TagSetList {
    fn from(sets: Vec<TagSet>) -> Self {
        sets.into_iter().collect()
    }
}

impl From<TagSetList> for Vec<TagSet> {
    fn from(list: TagSetList) -> Self {
        list.sets
    }
}

impl FromIterator<TagSet> for TagSetList {
    fn from_iter<I: IntoIterator<Item = TagSet>>(iter: I) -> Self {
        let mut list = TagSetList::new();
        for set in iter {
            list.append(set);
        }
        list
    }
}

impl<'a> IntoIterator for &'a TagSetList {
    type Item = &'a TagSet;
    type IntoIter = std::slice::Iter<'a, TagSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

impl fmt::Display for TagSetList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.sets.iter().map(|s| format!("[{s}]")).collect();
        f.write_str(&parts.join(" | "))
    }
}
