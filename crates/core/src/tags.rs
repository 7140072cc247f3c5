//! Tag collections and the DNF filter grammar used by `MemoryDb` queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved tag keys every record carries so cascade deletion is possible.
pub const TAG_DOCUMENT_ID: &str = "document_id";
pub const TAG_FILE_ID: &str = "file_id";
pub const TAG_PART_NUMBER: &str = "part_number";
pub const TAG_SECTION_NUMBER: &str = "section_number";

/// Reserved tag keys carrying a record's origin-document metadata as
/// filterable tags, not just opaque payload fields (spec.md §4.4's
/// `tags = pipeline tags ∪ {..., source_name, source_url?, last_update}`).
pub const TAG_SOURCE_NAME: &str = "source_name";
pub const TAG_SOURCE_URL: &str = "source_url";
pub const TAG_LAST_UPDATE: &str = "last_update";

/// A multimap from string key to a non-empty list of string values.
///
/// Mirrors a `key:value` pair store: one key can carry multiple values, and
/// presence of a key is itself queryable. Insertion order within a key is
/// preserved so payload round-trips stay stable across upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCollection(BTreeMap<String, Vec<String>>);

impl TagCollection {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a value under `key`, appending if the key already has values.
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self.0.entry(key.into()).or_default().push(value.into());
    self
  }

  /// Replace all values for `key`.
  pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) -> &mut Self {
    if values.is_empty() {
      self.0.remove(&key.into());
    } else {
      self.0.insert(key.into(), values);
    }
    self
  }

  pub fn values(&self, key: &str) -> &[String] {
    self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn contains(&self, key: &str, value: &str) -> bool {
    self.0.get(key).is_some_and(|vs| vs.iter().any(|v| v == value))
  }

  pub fn has_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .0
      .iter()
      .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Merge `other` into `self`, appending values (not overwriting).
  pub fn extend(&mut self, other: &TagCollection) {
    for (k, v) in other.iter() {
      self.insert(k, v);
    }
  }

  /// Escape characters that collide with a `key:value` wire separator.
  ///
  /// Backends that serialize tags as `key:value` strings must apply this to
  /// values before writing, since `:` and `=` are reserved prefix characters.
  pub fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace(':', "\\:").replace('=', "\\=")
  }

  pub fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
      if c == '\\' {
        if let Some(&next) = chars.peek() {
          out.push(next);
          chars.next();
          continue;
        }
      }
      out.push(c);
    }
    out
  }
}

/// One conjunction of `(key, value)` equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter(Vec<(String, String)>);

impl TagFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.0.push((key.into(), value.into()));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  fn matches(&self, tags: &TagCollection) -> bool {
    self.0.iter().all(|(k, v)| tags.contains(k, v))
  }
}

/// A disjunction of conjunctions (DNF): `OR` of `AND`s of equalities.
///
/// Empty filter lists and empty inner filters are dropped before evaluation;
/// an empty `FilterSet` matches every record (spec.md's "empty filter lists
/// accept all records").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet(Vec<TagFilter>);

impl FilterSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_filters(filters: impl IntoIterator<Item = TagFilter>) -> Self {
    Self(filters.into_iter().filter(|f| !f.is_empty()).collect())
  }

  pub fn push(&mut self, filter: TagFilter) {
    if !filter.is_empty() {
      self.0.push(filter);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn conjunctions(&self) -> &[TagFilter] {
    &self.0
  }

  /// Record matches iff at least one conjunction matches all of its clauses.
  pub fn matches(&self, tags: &TagCollection) -> bool {
    self.0.is_empty() || self.0.iter().any(|f| f.matches(tags))
  }

  /// Rewrite filters that are all equalities on one key into a single
  /// `key IN (v1, v2, ...)` form. Correctness-preserving: the result set is
  /// identical to evaluating the original disjunction, just cheaper for
  /// backends that can push an `IN` list down to an index scan.
  pub fn optimize_single_key_in(&self) -> Option<(String, Vec<String>)> {
    let mut key: Option<&str> = None;
    let mut values = Vec::with_capacity(self.0.len());
    for conj in &self.0 {
      if conj.0.len() != 1 {
        return None;
      }
      let (k, v) = &conj.0[0];
      match key {
        None => key = Some(k.as_str()),
        Some(existing) if existing != k => return None,
        _ => {}
      }
      values.push(v.clone());
    }
    key.map(|k| (k.to_string(), values))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escape_roundtrip() {
    let raw = "a:b=c\\d";
    let escaped = TagCollection::escape(raw);
    assert_eq!(TagCollection::unescape(&escaped), raw);
  }

  #[test]
  fn empty_filter_set_matches_all() {
    let filters = FilterSet::new();
    let tags = TagCollection::new();
    assert!(filters.matches(&tags));
  }

  #[test]
  fn dnf_matches_any_conjunction() {
    let mut tags = TagCollection::new();
    tags.insert("user", "blake");

    let filters = FilterSet::from_filters([
      TagFilter::new().with("user", "taylor"),
      TagFilter::new().with("user", "blake"),
    ]);
    assert!(filters.matches(&tags));

    let filters = FilterSet::from_filters([TagFilter::new().with("user", "taylor")]);
    assert!(!filters.matches(&tags));
  }

  #[test]
  fn conjunction_requires_all_clauses() {
    let mut tags = TagCollection::new();
    tags.insert("user", "blake");
    tags.insert("doc", "a");

    let filters = FilterSet::from_filters([TagFilter::new().with("user", "blake").with("doc", "b")]);
    assert!(!filters.matches(&tags));

    let filters = FilterSet::from_filters([TagFilter::new().with("user", "blake").with("doc", "a")]);
    assert!(filters.matches(&tags));
  }

  #[test]
  fn empty_inner_filters_are_dropped() {
    let filters = FilterSet::from_filters([TagFilter::new(), TagFilter::new().with("k", "v")]);
    assert_eq!(filters.conjunctions().len(), 1);
  }

  #[test]
  fn in_list_rewrite_matches_naive_disjunction() {
    let filters = FilterSet::from_filters([
      TagFilter::new().with("doc", "a"),
      TagFilter::new().with("doc", "b"),
      TagFilter::new().with("doc", "c"),
    ]);
    let (key, values) = filters.optimize_single_key_in().unwrap();
    assert_eq!(key, "doc");
    assert_eq!(values, vec!["a", "b", "c"]);

    for v in ["a", "b", "c"] {
      let mut tags = TagCollection::new();
      tags.insert("doc", v);
      assert!(filters.matches(&tags));
    }
    let mut tags = TagCollection::new();
    tags.insert("doc", "d");
    assert!(!filters.matches(&tags));
  }

  #[test]
  fn in_list_rewrite_refuses_mixed_keys() {
    let filters =
      FilterSet::from_filters([TagFilter::new().with("doc", "a"), TagFilter::new().with("user", "b")]);
    assert!(filters.optimize_single_key_in().is_none());
  }
}
