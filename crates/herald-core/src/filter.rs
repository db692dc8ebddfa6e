//! Named filter values and their fixed-width hashed form.
//!
//! A watch may narrow an event with filters such as `color = "red"`. Stored
//! filter values are always `u32`: strings are hashed with CRC-32 (the IEEE
//! polynomial used by zlib) over their UTF-8 bytes, integers pass through
//! unchanged. The hash is stable across platforms and releases, so rows written
//! by one deployment stay matchable by another.
//!
//! CRC-32 is not a general-purpose hash. It is collision-free over common
//! English word lists, which is what filter domains usually look like; callers
//! with large or unusual value sets should hash themselves and pass integers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A raw filter value, before hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
  Int(u32),
  Text(String),
}

impl FilterValue {
  pub fn hashed(&self) -> u32 {
    match self {
      Self::Int(value) => *value,
      Self::Text(text) => hash_to_unsigned(text),
    }
  }
}

impl From<u32> for FilterValue {
  fn from(value: u32) -> Self { Self::Int(value) }
}

impl From<&str> for FilterValue {
  fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<String> for FilterValue {
  fn from(value: String) -> Self { Self::Text(value) }
}

/// CRC-32 of the UTF-8 encoding of `text`.
pub fn hash_to_unsigned(text: &str) -> u32 { crc32fast::hash(text.as_bytes()) }

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A set of named filter values, at most one per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
  pub fn new() -> Self { Self::default() }

  /// Add (or replace) the value for `name`.
  pub fn with(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
    self.insert(name, value);
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FilterValue>) {
    self.0.insert(name.into(), value.into());
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

  /// The first name not in `declared`, if any.
  pub fn first_undeclared<'a>(&'a self, declared: &BTreeSet<String>) -> Option<&'a str> {
    self.names().find(|name| !declared.contains(*name))
  }

  /// The stored form: every value hashed to `u32`.
  pub fn hashed(&self) -> BTreeMap<String, u32> {
    self
      .0
      .iter()
      .map(|(name, value)| (name.clone(), value.hashed()))
      .collect()
  }
}

impl<N, V> FromIterator<(N, V)> for Filters
where
  N: Into<String>,
  V: Into<FilterValue>,
{
  fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
    let mut filters = Self::new();
    for (name, value) in iter {
      filters.insert(name, value);
    }
    filters
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strings_hash_to_crc32() {
    assert_eq!(hash_to_unsigned("hello"), 0x3610_a686);
    assert_eq!(
      hash_to_unsigned("The quick brown fox jumps over the lazy dog"),
      0x414f_a339
    );
  }

  #[test]
  fn integers_pass_through() {
    assert_eq!(FilterValue::from(6u32).hashed(), 6);
    assert_eq!(FilterValue::from(u32::MAX).hashed(), u32::MAX);
  }

  #[test]
  fn unicode_hashes_deterministically() {
    let a = FilterValue::from("blüe").hashed();
    let b = FilterValue::from(String::from("blüe")).hashed();
    assert_eq!(a, b);
    assert_ne!(a, FilterValue::from("blue").hashed());
  }

  #[test]
  fn first_undeclared_reports_typos() {
    let declared: BTreeSet<String> = ["color".to_owned(), "flavor".to_owned()].into();
    let filters = Filters::new().with("color", 1u32).with("smoo", 3u32);
    assert_eq!(filters.first_undeclared(&declared), Some("smoo"));
    assert_eq!(Filters::new().with("flavor", "x").first_undeclared(&declared), None);
  }

  #[test]
  fn later_values_replace_earlier_ones() {
    let filters = Filters::new().with("color", 1u32).with("color", 2u32);
    assert_eq!(filters.hashed().get("color"), Some(&2));
  }
}
