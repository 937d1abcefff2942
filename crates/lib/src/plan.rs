//! From requested package names to an ordered spec table.
//!
//! Planning loads the defaults, resolves the requested packages with their
//! dependencies, rejects resolutions the selected defaults or the host
//! system cannot satisfy and schedules the rest.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::build::BuildError;
use crate::defaults::{parse_defaults, read_defaults};
use crate::recipe::RecipeStore;
use crate::resolve::{NoSystem, Resolution, ResolveContext, SystemCheck, ValidDefaults, resolve};
use crate::schedule::build_order;
use crate::spec::SpecArena;

/// Inputs to [`plan`] besides the recipes.
#[derive(Debug, Clone)]
pub struct PlanOptions {
  pub architecture: String,
  pub defaults: String,
  pub disable: Vec<String>,
  pub prefer_system: bool,
  pub no_system: NoSystem,
  pub force_rebuild: Vec<String>,
}

impl PlanOptions {
  pub fn new(architecture: impl Into<String>, defaults: impl Into<String>) -> Self {
    Self {
      architecture: architecture.into(),
      defaults: defaults.into(),
      disable: Vec::new(),
      prefer_system: false,
      no_system: NoSystem::None,
      force_rebuild: Vec::new(),
    }
  }
}

/// A resolved and scheduled set of packages.
#[derive(Debug, Clone)]
pub struct Plan {
  pub specs: SpecArena,
  /// Every resolved package, dependencies first.
  pub order: Vec<String>,
  pub system_packages: BTreeSet<String>,
  pub own_packages: BTreeSet<String>,
  pub disabled: BTreeSet<String>,
}

/// Resolve and schedule `requested`.
pub fn plan(
  requested: &[String],
  store: &RecipeStore<'_>,
  options: &PlanOptions,
  checker: &dyn SystemCheck,
) -> Result<Plan, BuildError> {
  let resolution = resolve_packages(requested, store, options, checker)?;
  check_defaults(&resolution.valid_defaults, &options.defaults)?;
  check_requirements(&resolution)?;

  if !resolution.system_packages.is_empty() {
    info!(packages = ?resolution.system_packages, "taking packages from the system");
  }
  if !resolution.own_packages.is_empty() {
    info!(packages = ?resolution.own_packages, "packages cannot be taken from the system and will be built");
  }

  let order = build_order(&resolution.specs)?;
  Ok(Plan {
    specs: resolution.specs,
    order,
    system_packages: resolution.system_packages,
    own_packages: resolution.own_packages,
    disabled: resolution.disabled,
  })
}

/// Load the defaults and resolve `requested`, without judging the result.
pub(crate) fn resolve_packages(
  requested: &[String],
  store: &RecipeStore<'_>,
  options: &PlanOptions,
  checker: &dyn SystemCheck,
) -> Result<Resolution, BuildError> {
  let defaults = read_defaults(store, &options.defaults, &options.architecture)?;
  let parsed = parse_defaults(&options.disable, &defaults.metadata)?;
  debug!(
    defaults = %defaults.name,
    overrides = parsed.overrides.len(),
    disabled = parsed.disable.len(),
    "loaded defaults"
  );

  let mut ctx = ResolveContext::new(&options.architecture, &options.defaults);
  ctx.disable = parsed.disable;
  ctx.overrides = parsed.overrides;
  ctx.taps = parsed.taps;
  ctx.prefer_system = options.prefer_system;
  ctx.no_system = options.no_system.clone();
  ctx.force_rebuild = options.force_rebuild.clone();

  Ok(resolve(requested, store, &ctx, checker)?)
}

fn check_defaults(valid: &ValidDefaults, defaults: &str) -> Result<(), BuildError> {
  match valid {
    ValidDefaults::Unconstrained => Ok(()),
    ValidDefaults::Incompatible => Err(BuildError::NoValidDefaults),
    ValidDefaults::Constrained(list) if list.iter().any(|d| d == defaults) => Ok(()),
    ValidDefaults::Constrained(list) => {
      let mut sorted = list.clone();
      sorted.sort();
      Err(BuildError::IncompatibleDefaults {
        defaults: defaults.to_string(),
        message: format!(
          "Specified default `{defaults}' is not compatible with the packages you want to build.\nValid defaults:\n\n- {}",
          sorted.join("\n- ")
        ),
      })
    }
  }
}

fn check_requirements(resolution: &Resolution) -> Result<(), BuildError> {
  if resolution.failed_requirements.is_empty() {
    return Ok(());
  }
  let mut failed = resolution.failed_requirements.clone();
  failed.sort();
  let lines: Vec<String> = failed
    .iter()
    .map(|(package, hint)| match hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
      Some(hint) => format!("- {package}: {hint}"),
      None => format!("- {package}"),
    })
    .collect();
  Err(BuildError::FailedRequirements {
    packages: failed.into_iter().map(|(p, _)| p).collect(),
    message: format!(
      "The following packages are system requirements and could not be found:\n\n{}",
      lines.join("\n")
    ),
  })
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

  fn no_checks(_: &str, _: &str) -> std::io::Result<CheckOutput> {
    panic!("no system check expected");
  }

  fn plan_in(dir: &RecipeDir, requested: &[&str], options: &PlanOptions, checker: &dyn SystemCheck) -> Result<Plan, BuildError> {
    let scm = FakeScm::default();
    let store = RecipeStore::new(dir.path(), &scm);
    plan(&names(requested), &store, options, checker)
  }

  #[test]
  fn orders_defaults_then_dependencies() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe("zlib", "package: zlib\nversion: v1.3", "make");
    dir.recipe("root", "package: root\nversion: v6\nrequires: [zlib]", "make");

    let plan = plan_in(&dir, &["zlib", "root"], &PlanOptions::new("slc9_x86-64", "release"), &no_checks).unwrap();
    assert_eq!(plan.order, vec!["defaults-release", "zlib", "root"]);
  }

  #[test]
  fn defaults_disable_list_is_honoured() {
    let dir = RecipeDir::new();
    dir.recipe("defaults-release", "package: defaults-release\nversion: v1\ndisable: [zlib]", "");
    dir.recipe("zlib", "package: zlib\nversion: v1.3", "make");
    dir.recipe("root", "package: root\nversion: v6\nrequires: [zlib]", "make");

    let plan = plan_in(&dir, &["root"], &PlanOptions::new("slc9_x86-64", "release"), &no_checks).unwrap();
    assert_eq!(plan.order, vec!["defaults-release", "root"]);
    assert!(plan.disabled.contains("zlib"));
  }

  #[test]
  fn missing_defaults_file_lists_alternatives() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe("zlib", "package: zlib\nversion: v1.3", "make");

    let err = plan_in(&dir, &["zlib"], &PlanOptions::new("slc9_x86-64", "o2"), &no_checks).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'o2' does not exist"), "{message}");
    assert!(message.contains("release"), "{message}");
  }

  #[test]
  fn disjoint_valid_defaults_are_incompatible() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe("a", "package: a\nversion: v1\nvalid_defaults: [x, y]", "");
    dir.recipe("b", "package: b\nversion: v1\nvalid_defaults: [z]", "");

    let err = plan_in(&dir, &["a", "b"], &PlanOptions::new("slc9_x86-64", "release"), &no_checks).unwrap_err();
    assert!(matches!(err, BuildError::NoValidDefaults));
  }

  #[test]
  fn failed_system_requirement_is_reported_with_hint() {
    let dir = RecipeDir::new();
    dir.default_defaults();
    dir.recipe(
      "openssl",
      "package: openssl\nversion: v1\nsystem_requirement: \".*\"\nsystem_requirement_check: \"false\"\nsystem_requirement_missing: install openssl-devel",
      "",
    );
    let failing = |_: &str, _: &str| -> std::io::Result<CheckOutput> {
      Ok(CheckOutput {
        code: 1,
        output: String::new(),
      })
    };

    let err = plan_in(&dir, &["openssl"], &PlanOptions::new("slc9_x86-64", "release"), &failing).unwrap_err();
    match err {
      BuildError::FailedRequirements { packages, message } => {
        assert_eq!(packages, vec!["openssl"]);
        assert!(message.contains("- openssl"), "{message}");
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
