//! Resolved package specifications.
//!
//! A [`PackageSpec`] is created once per package name during resolution
//! and then enriched by preparation, hashing and revision assignment.
//! Specs live in a [`SpecArena`] that remembers discovery order, which the
//! scheduler uses to break ties.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::recipe::{OrderedMap, StringOrList};

/// How a package is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
  /// Built from its own recipe.
  #[default]
  Own,
  /// Taken from the host system.
  System,
  /// Swapped for a replacement spec picked by the system check.
  Replacement { has_recipe: bool },
}

impl Requirement {
  /// Whether the orchestrator builds this package itself.
  pub fn is_own_build(self) -> bool {
    match self {
      Requirement::Own => true,
      Requirement::System => false,
      Requirement::Replacement { has_recipe } => has_recipe,
    }
  }
}

/// A build revision. Revisions assigned without a writable remote store are
/// rendered with a `local` prefix so they never clash with published ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Revision {
  pub local: bool,
  pub number: u32,
}

impl Revision {
  pub fn remote(number: u32) -> Self {
    Self { local: false, number }
  }

  pub fn local(number: u32) -> Self {
    Self { local: true, number }
  }
}

impl fmt::Display for Revision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.local {
      write!(f, "local{}", self.number)
    } else {
      write!(f, "{}", self.number)
    }
  }
}

impl FromStr for Revision {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.strip_prefix("local") {
      Some(n) => Ok(Revision::local(n.parse()?)),
      None => Ok(Revision::remote(s.parse()?)),
    }
  }
}

/// Every hash computed for a package.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SpecHashes {
  pub remote_revision_hash: String,
  pub local_revision_hash: String,
  /// Equivalent hashes a shared cache may hold, most specific first.
  pub remote_hashes: Vec<String>,
  /// Equivalent hashes of artifacts only this machine can have built.
  pub local_hashes: Vec<String>,
  pub deps_hash: String,
  pub incremental_hash: Option<String>,
}

/// A fully resolved package.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageSpec {
  pub package: String,
  pub version: String,
  pub tag: String,
  pub source: Option<String>,
  pub commit_hash: String,
  pub requires: Vec<String>,
  pub build_requires: Vec<String>,
  pub runtime_requires: Vec<String>,
  pub full_requires: BTreeSet<String>,
  pub full_build_requires: BTreeSet<String>,
  pub full_runtime_requires: BTreeSet<String>,
  pub disabled: BTreeSet<String>,
  #[serde(skip)]
  pub recipe: String,
  #[serde(skip)]
  pub incremental_recipe: Option<String>,
  pub env: OrderedMap<String>,
  pub append_path: OrderedMap<StringOrList>,
  pub prepend_path: OrderedMap<StringOrList>,
  pub relocate_paths: Vec<String>,
  pub valid_defaults: Option<Vec<String>>,
  pub force_rebuild: bool,
  pub requirement: Requirement,
  pub scm_refs: BTreeMap<String, String>,
  pub is_devel_pkg: bool,
  pub devel_hash: Option<String>,
  pub devel_prefix: Option<String>,
  pub build_family: String,
  pub hashes: Option<SpecHashes>,
  pub hash: Option<String>,
  pub revision: Option<Revision>,
  pub obsolete_tarball: Option<PathBuf>,
}

impl PackageSpec {
  /// `hash` plus the devel hash, the identity dependents fold into their own hash.
  pub fn hash_and_devel(&self) -> Option<String> {
    let hash = self.hash.as_deref()?;
    Some(format!("{}{}", hash, self.devel_hash.as_deref().unwrap_or("")))
  }

  /// `<version>-<revision>`, the name of the install directory.
  pub fn version_revision(&self) -> Option<String> {
    self.revision.map(|rev| format!("{}-{}", self.version, rev))
  }
}

/// Specs in discovery order with lookup by name.
#[derive(Debug, Clone, Default)]
pub struct SpecArena {
  specs: Vec<PackageSpec>,
  index: HashMap<String, usize>,
}

impl SpecArena {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a spec. A spec with the same name replaces the earlier one in place.
  pub fn insert(&mut self, spec: PackageSpec) {
    match self.index.get(&spec.package) {
      Some(&i) => self.specs[i] = spec,
      None => {
        self.index.insert(spec.package.clone(), self.specs.len());
        self.specs.push(spec);
      }
    }
  }

  pub fn get(&self, name: &str) -> Option<&PackageSpec> {
    self.index.get(name).map(|&i| &self.specs[i])
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageSpec> {
    self.index.get(name).map(|&i| &mut self.specs[i])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Specs in discovery order.
  pub fn iter(&self) -> impl Iterator<Item = &PackageSpec> {
    self.specs.iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PackageSpec> {
    self.specs.iter_mut()
  }

  /// Names in discovery order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.specs.iter().map(|s| s.package.as_str())
  }

  /// Discovery position of `name`.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  pub fn len(&self) -> usize {
    self.specs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.specs.is_empty()
  }
}
