//! Checking whether packages can be built on this host, without building.
//!
//! Unlike [`plan`](crate::plan::plan), a failed system requirement or an
//! incompatible defaults set does not stop the check: everything found is
//! collected into a [`DoctorReport`].

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::build::BuildError;
use crate::consts::DEFAULTS_PACKAGE;
use crate::plan::{PlanOptions, resolve_packages};
use crate::recipe::RecipeStore;
use crate::resolve::{SystemCheck, ValidDefaults};

/// A system requirement whose check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRequirement {
  pub package: String,
  /// How to install the package, as the recipe suggests.
  pub hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
  pub defaults: String,
  /// Requested packages without a recipe; they are left out of the check.
  pub missing_recipes: Vec<String>,
  pub system_packages: BTreeSet<String>,
  pub own_packages: BTreeSet<String>,
  /// Built because policy never lets them come from the system.
  pub always_built: BTreeSet<String>,
  pub failed_requirements: Vec<FailedRequirement>,
  /// Defaults every package accepts; `None` when no package restricts them.
  pub valid_defaults: Option<Vec<String>>,
  /// Two packages accept disjoint sets of defaults.
  pub incompatible_defaults: bool,
}

impl DoctorReport {
  /// Whether the selected defaults can build every package.
  pub fn defaults_ok(&self) -> bool {
    !self.incompatible_defaults && self.valid_defaults.as_ref().is_none_or(|v| v.contains(&self.defaults))
  }

  /// `3` for incompatible defaults, `2` for defaults outside the valid set,
  /// `1` for missing recipes or system requirements, `0` otherwise.
  pub fn exit_code(&self) -> i32 {
    if self.incompatible_defaults {
      3
    } else if !self.defaults_ok() {
      2
    } else if !self.failed_requirements.is_empty() || !self.missing_recipes.is_empty() {
      1
    } else {
      0
    }
  }
}

/// Resolve `requested` and report how each package would be provided.
pub fn doctor(
  requested: &[String],
  store: &RecipeStore<'_>,
  options: &PlanOptions,
  checker: &dyn SystemCheck,
) -> Result<DoctorReport, BuildError> {
  let (present, missing_recipes): (Vec<String>, Vec<String>) = requested
    .iter()
    .cloned()
    .partition(|name| store.root().join(format!("{}.sh", name.to_lowercase())).is_file());
  for name in &missing_recipes {
    warn!(package = %name, "cannot find a recipe");
  }

  let resolution = resolve_packages(&present, store, options, checker)?;

  let mut failed_requirements: Vec<FailedRequirement> = resolution
    .failed_requirements
    .iter()
    .map(|(package, hint)| FailedRequirement {
      package: package.clone(),
      hint: hint.as_deref().map(str::trim).filter(|h| !h.is_empty()).map(str::to_string),
    })
    .collect();
  failed_requirements.sort_by(|a, b| a.package.cmp(&b.package));

  let always_built = resolution
    .specs
    .names()
    .filter(|name| *name != DEFAULTS_PACKAGE)
    .filter(|name| !resolution.system_packages.contains(*name) && !resolution.own_packages.contains(*name))
    .filter(|name| !failed_requirements.iter().any(|f| f.package == *name))
    .map(str::to_string)
    .collect();

  let (valid_defaults, incompatible_defaults) = match resolution.valid_defaults {
    ValidDefaults::Unconstrained => (None, false),
    ValidDefaults::Constrained(list) => (Some(list), false),
    ValidDefaults::Incompatible => (None, true),
  };

  let report = DoctorReport {
    defaults: options.defaults.clone(),
    missing_recipes,
    system_packages: resolution.system_packages,
    own_packages: resolution.own_packages,
    always_built,
    failed_requirements,
    valid_defaults,
    incompatible_defaults,
  };
  info!(exit_code = report.exit_code(), "doctor finished");
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resolve::CheckOutput;
  use crate::scm::testing::FakeScm;
  use crate::util::testutil::RecipeDir;

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  fn doctor_in(dir: &RecipeDir, requested: &[&str], defaults: &str, checker: &dyn SystemCheck) -> DoctorReport {
    let scm = FakeScm::default();
    let store = RecipeStore::new(dir.path(), &scm);
    doctor(&names(requested), &store, &PlanOptions::new("slc9_x86-64", defaults), checker).unwrap()
  }

  /// Passes the check of any package named in `present`.
  fn host_with(present: &'static [&'static str]) -> impl Fn(&str, &str) -> std::io::Result<CheckOutput> {
    move |package: &str, _: &str| -> std::io::Result<CheckOutput> {
      Ok(CheckOutput {
        code: if present.iter().any(|p| *p == package) { 0 } else { 1 },
        output: String::new(),
      })
    }
  }

  fn repo() -> RecipeDir {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe(
      "zlib",
      "package: zlib\nversion: v1\nprefer_system: \".*\"\nprefer_system_check: pkg-config zlib",
      "make",
    );
    dir.recipe(
      "bz2",
      "package: bz2\nversion: v1\nprefer_system: \".*\"\nprefer_system_check: pkg-config bz2",
      "make",
    );
    dir.recipe(
      "openssl",
      "package: openssl\nversion: v1\nsystem_requirement: \".*\"\nsystem_requirement_check: pkg-config openssl\nsystem_requirement_missing: \"install openssl-devel\n\"",
      "",
    );
    dir.recipe("cmake", "package: cmake\nversion: v3", "make");
    dir.recipe(
      "root",
      "package: root\nversion: v6\nrequires: [zlib, bz2, openssl]\nbuild_requires: [cmake]",
      "make",
    );
    dir
  }

  #[test]
  fn sorts_packages_by_how_they_are_provided() {
    let dir = repo();
    let report = doctor_in(&dir, &["root"], "release", &host_with(&["zlib"]));

    assert_eq!(report.system_packages, BTreeSet::from(["zlib".to_string()]));
    assert_eq!(report.own_packages, BTreeSet::from(["bz2".to_string()]));
    assert_eq!(
      report.failed_requirements,
      vec![FailedRequirement {
        package: "openssl".to_string(),
        hint: Some("install openssl-devel".to_string()),
      }]
    );
    assert_eq!(
      report.always_built,
      BTreeSet::from(["cmake".to_string(), "root".to_string()])
    );
    assert_eq!(report.exit_code(), 1);
  }

  #[test]
  fn healthy_host_exits_zero() {
    let dir = repo();
    let report = doctor_in(&dir, &["root"], "release", &host_with(&["zlib", "openssl"]));
    assert!(report.failed_requirements.is_empty());
    assert!(report.defaults_ok());
    assert_eq!(report.exit_code(), 0);
  }

  #[test]
  fn missing_recipe_is_reported_and_skipped() {
    let dir = repo();
    let report = doctor_in(&dir, &["cmake", "NoSuchThing"], "release", &host_with(&[]));
    assert_eq!(report.missing_recipes, vec!["NoSuchThing"]);
    assert!(report.always_built.contains("cmake"));
    assert_eq!(report.exit_code(), 1);
  }

  #[test]
  fn defaults_outside_the_valid_set() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe("defaults-o2", "package: defaults-release\nversion: v1", "");
    dir.recipe("o2", "package: o2\nversion: v1\nvalid_defaults: [o2, o2-dev]", "make");

    let report = doctor_in(&dir, &["o2"], "release", &host_with(&[]));
    assert_eq!(report.valid_defaults, Some(names(&["o2", "o2-dev"])));
    assert!(!report.defaults_ok());
    assert_eq!(report.exit_code(), 2);

    let report = doctor_in(&dir, &["o2"], "o2", &host_with(&[]));
    assert_eq!(report.exit_code(), 0);
  }

  #[test]
  fn disjoint_valid_defaults_do_not_abort() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe("a", "package: a\nversion: v1\nvalid_defaults: [x]", "");
    dir.recipe("b", "package: b\nversion: v1\nvalid_defaults: [z]", "");

    let report = doctor_in(&dir, &["a", "b"], "release", &host_with(&[]));
    assert!(report.incompatible_defaults);
    assert_eq!(report.exit_code(), 3);
  }
}
