//! Defaults files, per-package overrides and defaults validation.
//!
//! A defaults file (`defaults-<name>.sh`) is a recipe for the
//! `defaults-release` pseudo-package. Its header carries global environment,
//! packages to disable and a mapping of per-package overrides. An optional
//! `defaults-<architecture>.sh` is layered on top.

use fancy_regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::DEFAULTS_PACKAGE;
use crate::recipe::store::DIST_TAP_PREFIX;
use crate::recipe::{Metadata, OrderedMap, Recipe, RecipeError, RecipeStore, StringOrList, Taps, parse_recipe};

/// Errors that can occur while loading or validating defaults.
#[derive(Debug, Error)]
pub enum DefaultsError {
  #[error("defaults set '{defaults}' does not exist; available defaults: {}", .available.join(", "))]
  Missing { defaults: String, available: Vec<String> },

  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error("invalid override pattern '{pattern}': {message}")]
  InvalidPattern { pattern: String, message: String },

  #[error("valid_defaults needs to be a string or a list of strings. Found {found}.")]
  InvalidValidDefaults { found: String },
}

/// A loaded defaults file.
#[derive(Debug, Clone)]
pub struct Defaults {
  pub name: String,
  pub file: String,
  pub metadata: Metadata,
  pub body: String,
}

/// Load `defaults-<name>.sh` and merge `defaults-<architecture>.sh` when present.
///
/// The architecture file contributes `env`, `disable` and `overrides`.
pub fn read_defaults(store: &RecipeStore<'_>, defaults: &str, architecture: &str) -> Result<Defaults, DefaultsError> {
  let no_taps = Taps::new();
  let text = match store.read(&format!("defaults-{defaults}"), &no_taps) {
    Ok(text) => text,
    Err(RecipeError::Read { .. }) => {
      return Err(DefaultsError::Missing {
        defaults: defaults.to_string(),
        available: store.available_defaults(),
      });
    }
    Err(e) => return Err(e.into()),
  };
  let Recipe { mut metadata, body } = parse_recipe(&text.file, &text.text)?;

  if let Ok(arch_text) = store.read(&format!("defaults-{architecture}"), &no_taps) {
    debug!(file = %arch_text.file, "merging architecture defaults");
    let arch = parse_recipe(&arch_text.file, &arch_text.text)?.metadata;
    merge_architecture_defaults(&mut metadata, &arch);
  }

  Ok(Defaults {
    name: defaults.to_string(),
    file: text.file,
    metadata,
    body,
  })
}

fn merge_architecture_defaults(base: &mut Metadata, arch: &Metadata) {
  if let Some(arch_env) = &arch.env {
    let env = base.env.get_or_insert_with(OrderedMap::new);
    for (k, v) in arch_env.iter() {
      env.insert(k, v.clone());
    }
  }
  if let Some(arch_disable) = &arch.disable {
    let mut disable = base.disable.as_ref().map(|d| d.to_vec()).unwrap_or_default();
    disable.extend(arch_disable.to_vec());
    base.disable = Some(StringOrList::Many(disable));
  }
  if let Some(arch_overrides) = &arch.overrides {
    let overrides = base.overrides.get_or_insert_with(OrderedMap::new);
    for (k, v) in arch_overrides.iter() {
      overrides.insert(k, v.clone());
    }
  }
}

/// Ordered table of `(pattern, partial metadata)` overrides.
#[derive(Debug, Clone)]
pub struct OverrideTable {
  entries: Vec<(String, Regex, Metadata)>,
}

impl Default for OverrideTable {
  fn default() -> Self {
    Self::new()
  }
}

impl OverrideTable {
  /// A table holding only the (empty) `defaults-release` entry.
  pub fn new() -> Self {
    let mut table = Self { entries: Vec::new() };
    // The literal name is always a valid pattern.
    let _ = table.insert(DEFAULTS_PACKAGE, Metadata::default());
    table
  }

  /// Add or replace the override for `pattern`. The pattern is lower-cased and
  /// must match a whole package name.
  pub fn insert(&mut self, pattern: &str, overlay: Metadata) -> Result<(), DefaultsError> {
    let pattern = pattern.to_lowercase();
    let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| DefaultsError::InvalidPattern {
      pattern: pattern.clone(),
      message: e.to_string(),
    })?;
    match self.entries.iter_mut().find(|(p, _, _)| *p == pattern) {
      Some(entry) => entry.2 = overlay,
      None => self.entries.push((pattern, regex, overlay)),
    }
    Ok(())
  }

  /// Apply every matching override to `metadata`, in declaration order.
  pub fn apply(&self, package: &str, metadata: &mut Metadata) {
    let name = package.to_lowercase();
    for (pattern, regex, overlay) in &self.entries {
      match regex.is_match(&name) {
        Ok(true) => {
          debug!(package = %package, pattern = %pattern, "applying override");
          metadata.merge(overlay);
        }
        Ok(false) => {}
        Err(e) => warn!(package = %package, pattern = %pattern, error = %e, "could not match override pattern"),
      }
    }
  }

  pub fn patterns(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(p, _, _)| p.as_str())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Result of [`parse_defaults`].
#[derive(Debug, Clone, Default)]
pub struct ParsedDefaults {
  pub disable: Vec<String>,
  pub overrides: OverrideTable,
  pub taps: Taps,
}

/// Combine explicit disables with the defaults file's, and build the
/// override and tap tables.
///
/// An override key `Name@ref` applies to `name` and also records a tap so
/// the recipe of `Name` is read from `ref` of the recipe repository.
pub fn parse_defaults(disable: &[String], defaults: &Metadata) -> Result<ParsedDefaults, DefaultsError> {
  let mut parsed = ParsedDefaults {
    disable: disable.to_vec(),
    ..Default::default()
  };

  if let Some(extra) = &defaults.disable {
    for name in extra.to_vec() {
      if !parsed.disable.contains(&name) {
        parsed.disable.push(name);
      }
    }
  }

  if let Some(overrides) = &defaults.overrides {
    for (key, overlay) in overrides.iter() {
      let (name, git_ref) = match key.split_once('@') {
        Some((name, git_ref)) => (name, Some(git_ref)),
        None => (key, None),
      };
      parsed.overrides.insert(name, overlay.clone())?;
      if git_ref.is_some() {
        parsed
          .taps
          .insert(name.to_lowercase(), format!("{DIST_TAP_PREFIX}{key}"));
      }
    }
  }

  Ok(parsed)
}

/// Outcome of checking one recipe against the selected defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultsCheck {
  /// The recipe does not restrict defaults.
  Unconstrained,
  /// The recipe lists the selected defaults among its valid ones.
  Accepted(Vec<String>),
  /// The recipe does not accept the selected defaults.
  Rejected { valid: Vec<String>, message: String },
}

impl DefaultsCheck {
  pub fn is_ok(&self) -> bool {
    !matches!(self, DefaultsCheck::Rejected { .. })
  }

  /// Defaults the recipe accepts, empty when unconstrained.
  pub fn valid(&self) -> &[String] {
    match self {
      DefaultsCheck::Unconstrained => &[],
      DefaultsCheck::Accepted(valid) | DefaultsCheck::Rejected { valid, .. } => valid,
    }
  }
}

/// Check whether `package` can be built with `defaults`.
pub fn validate_defaults(
  package: &str,
  valid_defaults: Option<&serde_yaml::Value>,
  defaults: &str,
) -> Result<DefaultsCheck, DefaultsError> {
  let Some(value) = valid_defaults else {
    return Ok(DefaultsCheck::Unconstrained);
  };
  let valid = valid_defaults_list(value)?;

  if valid.iter().any(|v| v == defaults) {
    return Ok(DefaultsCheck::Accepted(valid));
  }

  let message = format!(
    "Cannot compile {package} with `{defaults}' default. Valid defaults are\n{}",
    valid.iter().map(|v| format!(" - {v}")).collect::<Vec<_>>().join("\n")
  );
  Ok(DefaultsCheck::Rejected { valid, message })
}

/// Interpret a `valid_defaults` header value.
pub fn valid_defaults_list(value: &serde_yaml::Value) -> Result<Vec<String>, DefaultsError> {
  let invalid = || DefaultsError::InvalidValidDefaults {
    found: serde_yaml::to_string(value)
      .map(|s| s.trim().to_string())
      .unwrap_or_else(|_| format!("{value:?}")),
  };
  match value {
    serde_yaml::Value::String(s) => Ok(vec![s.clone()]),
    serde_yaml::Value::Sequence(items) => items
      .iter()
      .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
      .collect(),
    _ => Err(invalid()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scm::testing::FakeScm;
  use crate::util::testutil::RecipeDir;

  fn meta(yaml: &str) -> Metadata {
    serde_yaml::from_str(yaml).unwrap()
  }

  mod overrides {
    use super::*;

    #[test]
    fn table_starts_with_defaults_release() {
      let table = OverrideTable::new();
      assert_eq!(table.patterns().collect::<Vec<_>>(), vec!["defaults-release"]);
    }

    #[test]
    fn later_overrides_win() {
      let mut table = OverrideTable::new();
      table.insert("root", meta("version: v1\ntag: t1\n")).unwrap();
      table.insert("ro.*", meta("version: v2\n")).unwrap();

      let mut m = meta("package: ROOT\nversion: v0\n");
      table.apply("ROOT", &mut m);
      assert_eq!(m.version_str(), Some("v2"));
      assert_eq!(m.tag.as_deref(), Some("t1"));
    }

    #[test]
    fn patterns_must_match_the_whole_name() {
      let mut table = OverrideTable::new();
      table.insert("root", meta("version: v1\n")).unwrap();

      let mut m = meta("package: rootcling\nversion: v0\n");
      table.apply("rootcling", &mut m);
      assert_eq!(m.version_str(), Some("v0"));
    }

    #[test]
    fn lookahead_pattern_excludes_names() {
      let mut table = OverrideTable::new();
      table.insert("(?!root$).*", meta("tag: pinned\n")).unwrap();

      let mut root = meta("package: ROOT\nversion: v0\n");
      table.apply("ROOT", &mut root);
      assert_eq!(root.tag, None);

      let mut zlib = meta("package: zlib\nversion: v0\n");
      table.apply("zlib", &mut zlib);
      assert_eq!(zlib.tag.as_deref(), Some("pinned"));
    }

    #[test]
    fn invalid_pattern_is_reported() {
      let mut table = OverrideTable::new();
      let err = table.insert("bad(", Metadata::default()).unwrap_err();
      assert!(matches!(err, DefaultsError::InvalidPattern { .. }));
    }
  }

  mod parsing {
    use super::*;

    #[test]
    fn merges_disables_and_builds_taps() {
      let defaults = meta(
        "package: defaults-release\nversion: v1\ndisable: [alien]\noverrides:\n  ROOT@v6-20:\n    version: v6-20\n  GCC-Toolchain:\n    tag: v12\n",
      );
      let parsed = parse_defaults(&["foo".to_string()], &defaults).unwrap();

      assert_eq!(parsed.disable, vec!["foo", "alien"]);
      assert_eq!(
        parsed.overrides.patterns().collect::<Vec<_>>(),
        vec!["defaults-release", "root", "gcc-toolchain"]
      );
      assert_eq!(parsed.taps.get("root").map(String::as_str), Some("dist:ROOT@v6-20"));
      assert!(!parsed.taps.contains_key("gcc-toolchain"));
    }

    #[test]
    fn single_string_disable_is_accepted() {
      let defaults = meta("package: defaults-release\nversion: v1\ndisable: alien\n");
      let parsed = parse_defaults(&[], &defaults).unwrap();
      assert_eq!(parsed.disable, vec!["alien"]);
    }
  }

  mod reading {
    use super::*;

    #[test]
    fn merges_architecture_file() {
      let dir = RecipeDir::new();
      dir.write(
        "defaults-release.sh",
        "package: defaults-release\nversion: v1\nenv:\n  CFLAGS: -O2\ndisable: [a]\n---\n",
      );
      dir.write(
        "defaults-slc9_x86-64.sh",
        "package: defaults-release\nversion: v1\nenv:\n  CXXFLAGS: -O3\ndisable: [b]\noverrides:\n  zlib:\n    version: v2\n---\n",
      );
      let scm = FakeScm::default();
      let store = RecipeStore::new(dir.path(), &scm);

      let defaults = read_defaults(&store, "release", "slc9_x86-64").unwrap();
      let env = defaults.metadata.env.unwrap();
      assert_eq!(env.keys().collect::<Vec<_>>(), vec!["CFLAGS", "CXXFLAGS"]);
      assert_eq!(defaults.metadata.disable.unwrap().to_vec(), vec!["a", "b"]);
      assert!(defaults.metadata.overrides.unwrap().get("zlib").is_some());
    }

    #[test]
    fn missing_defaults_lists_available_ones() {
      let dir = RecipeDir::new();
      dir.write("defaults-o2.sh", "package: defaults-release\nversion: v1\n---\n");
      let scm = FakeScm::default();
      let store = RecipeStore::new(dir.path(), &scm);

      let err = read_defaults(&store, "release", "slc9_x86-64").unwrap_err();
      match err {
        DefaultsError::Missing { defaults, available } => {
          assert_eq!(defaults, "release");
          assert_eq!(available, vec!["o2"]);
        }
        other => panic!("unexpected error: {other}"),
      }
    }
  }

  mod validation {
    use super::*;

    #[test]
    fn absent_valid_defaults_is_unconstrained() {
      let check = validate_defaults("zlib", None, "release").unwrap();
      assert_eq!(check, DefaultsCheck::Unconstrained);
      assert!(check.valid().is_empty());
    }

    #[test]
    fn string_is_a_single_valid_default() {
      let value = serde_yaml::Value::String("o2".to_string());
      let check = validate_defaults("O2", Some(&value), "o2").unwrap();
      assert_eq!(check, DefaultsCheck::Accepted(vec!["o2".to_string()]));
    }

    #[test]
    fn rejected_defaults_list_valid_ones() {
      let value: serde_yaml::Value = serde_yaml::from_str("[o2, o2-dataflow]").unwrap();
      let check = validate_defaults("O2", Some(&value), "release").unwrap();
      assert!(!check.is_ok());
      match check {
        DefaultsCheck::Rejected { message, valid } => {
          assert_eq!(valid, vec!["o2", "o2-dataflow"]);
          assert_eq!(
            message,
            "Cannot compile O2 with `release' default. Valid defaults are\n - o2\n - o2-dataflow"
          );
        }
        other => panic!("unexpected check: {other:?}"),
      }
    }

    #[test]
    fn non_string_entries_are_an_error() {
      let value: serde_yaml::Value = serde_yaml::from_str("[o2, 3]").unwrap();
      let err = validate_defaults("O2", Some(&value), "o2").unwrap_err();
      assert!(matches!(err, DefaultsError::InvalidValidDefaults { .. }));
    }

    #[test]
    fn mapping_is_an_error() {
      let value: serde_yaml::Value = serde_yaml::from_str("{a: b}").unwrap();
      assert!(valid_defaults_list(&value).is_err());
    }
  }
}
