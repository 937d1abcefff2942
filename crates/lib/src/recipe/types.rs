//! Recipe header types.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A header value written either as a single string or as a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
  One(String),
  Many(Vec<String>),
}

impl StringOrList {
  pub fn to_vec(&self) -> Vec<String> {
    match self {
      StringOrList::One(s) => vec![s.clone()],
      StringOrList::Many(v) => v.clone(),
    }
  }
}

/// String-keyed mapping that remembers the order keys were written in.
///
/// Recipe `env` and path mappings are order sensitive: later entries may
/// reference earlier ones, and the order feeds the build hash.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
  fn default() -> Self {
    Self(Vec::new())
  }
}

impl<V> OrderedMap<V> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a value. Replacing an existing key keeps its original position.
  pub fn insert(&mut self, key: impl Into<String>, value: V) {
    let key = key.into();
    match self.0.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.0.push((key, value)),
    }
  }

  pub fn get(&self, key: &str) -> Option<&V> {
    self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(|(k, _)| k.as_str())
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
  fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
    let mut map = OrderedMap::new();
    for (k, v) in iter {
      map.insert(k, v);
    }
    map
  }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (k, v) in &self.0 {
      map.serialize_entry(k, v)?;
    }
    map.end()
  }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
      type Value = OrderedMap<V>;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
          map.insert(key, value);
        }
        Ok(map)
      }

      fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(OrderedMap::new())
      }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
  }
}

/// The YAML header of a recipe.
///
/// Every field is optional so the same type describes a full recipe, a
/// partial override and a replacement spec. `version` and `valid_defaults`
/// are kept as raw YAML so their shape can be validated with a proper error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Metadata {
  pub package: Option<String>,
  pub version: Option<serde_yaml::Value>,
  pub tag: Option<String>,
  pub source: Option<String>,
  pub requires: Option<Vec<String>>,
  pub build_requires: Option<Vec<String>>,
  pub env: Option<OrderedMap<String>>,
  pub append_path: Option<OrderedMap<StringOrList>>,
  pub prepend_path: Option<OrderedMap<StringOrList>>,
  pub prefer_system: Option<String>,
  pub prefer_system_check: Option<String>,
  pub prefer_system_replacement_specs: Option<OrderedMap<Metadata>>,
  pub system_requirement: Option<String>,
  pub system_requirement_check: Option<String>,
  pub system_requirement_missing: Option<String>,
  pub valid_defaults: Option<serde_yaml::Value>,
  pub force_rebuild: Option<bool>,
  pub relocate_paths: Option<Vec<String>>,
  pub incremental_recipe: Option<String>,
  /// Build script carried by a replacement spec.
  pub recipe: Option<String>,
  /// Packages a defaults file disables.
  pub disable: Option<StringOrList>,
  /// Per-package overrides declared by a defaults file.
  pub overrides: Option<OrderedMap<Metadata>>,
}

macro_rules! merge_fields {
  ($dst:expr, $src:expr, $($field:ident),* $(,)?) => {
    $(
      if let Some(value) = &$src.$field {
        $dst.$field = Some(value.clone());
      }
    )*
  };
}

impl Metadata {
  /// Copy every field set in `overlay` onto `self`.
  pub fn merge(&mut self, overlay: &Metadata) {
    merge_fields!(
      self,
      overlay,
      package,
      version,
      tag,
      source,
      requires,
      build_requires,
      env,
      append_path,
      prepend_path,
      prefer_system,
      prefer_system_check,
      prefer_system_replacement_specs,
      system_requirement,
      system_requirement_check,
      system_requirement_missing,
      valid_defaults,
      force_rebuild,
      relocate_paths,
      incremental_recipe,
      recipe,
      disable,
      overrides,
    );
  }

  /// The version when it is written as a string.
  pub fn version_str(&self) -> Option<&str> {
    self.version.as_ref().and_then(|v| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ordered_map_keeps_declaration_order() {
    let map: OrderedMap<String> = serde_yaml::from_str("zeta: 1a\nalpha: 2b\nmid: 3c\n").unwrap();
    let keys: Vec<_> = map.keys().collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    assert_eq!(map.get("alpha").map(String::as_str), Some("2b"));
  }

  #[test]
  fn ordered_map_replace_keeps_position() {
    let mut map = OrderedMap::new();
    map.insert("a", 1);
    map.insert("b", 2);
    map.insert("a", 3);
    let entries: Vec<_> = map.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    assert_eq!(entries, vec![("a".to_string(), 3), ("b".to_string(), 2)]);
  }

  #[test]
  fn path_values_accept_string_or_list() {
    let map: OrderedMap<StringOrList> = serde_yaml::from_str("PATH: $FOO/bin\nLD_LIBRARY_PATH: [a, b]\n").unwrap();
    assert_eq!(map.get("PATH").unwrap().to_vec(), vec!["$FOO/bin"]);
    assert_eq!(map.get("LD_LIBRARY_PATH").unwrap().to_vec(), vec!["a", "b"]);
  }

  #[test]
  fn merge_only_overwrites_present_fields() {
    let mut base: Metadata = serde_yaml::from_str("package: ROOT\nversion: v6\nrequires: [zlib]\n").unwrap();
    let overlay: Metadata = serde_yaml::from_str("version: v7\ntag: v7-tag\n").unwrap();
    base.merge(&overlay);

    assert_eq!(base.version_str(), Some("v7"));
    assert_eq!(base.tag.as_deref(), Some("v7-tag"));
    assert_eq!(base.requires, Some(vec!["zlib".to_string()]));
    assert_eq!(base.package.as_deref(), Some("ROOT"));
  }

  #[test]
  fn numeric_version_is_not_a_string() {
    let meta: Metadata = serde_yaml::from_str("package: foo\nversion: 1.5\n").unwrap();
    assert!(meta.version.is_some());
    assert_eq!(meta.version_str(), None);
  }
}
