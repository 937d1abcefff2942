mod build;
mod clean;
mod deps;
mod doctor;
mod info;

pub use build::{BuildArgs, cmd_build};
pub use clean::cmd_clean;
pub use deps::cmd_deps;
pub use doctor::cmd_doctor;
pub use info::cmd_info;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use kiln_lib::plan::{Plan, PlanOptions, plan};
use kiln_lib::platform::{current_architecture, paths};
use kiln_lib::recipe::RecipeStore;
use kiln_lib::resolve::{NoSystem, ShellCheck};
use kiln_lib::scm::Scm;

use crate::RecipeArgs;

/// The architecture from the command line, or the detected one.
pub(crate) fn architecture(args: &RecipeArgs) -> Result<String> {
  architecture_or_detect(args.architecture.as_deref())
}

pub(crate) fn architecture_or_detect(architecture: Option<&str>) -> Result<String> {
  match architecture {
    Some(arch) => Ok(arch.to_string()),
    None => current_architecture().context("Could not detect the architecture; pass --architecture"),
  }
}

pub(crate) fn config_dir(args: &RecipeArgs) -> Result<PathBuf> {
  let dir = args.config_dir.clone().unwrap_or_else(paths::config_dir);
  if !dir.is_dir() {
    bail!(
      "Cannot find recipes under directory \"{}\". Pass --config-dir or set {}.",
      dir.display(),
      paths::CONFIG_DIR_ENV
    );
  }
  Ok(dir)
}

pub(crate) fn plan_options(args: &RecipeArgs, architecture: &str) -> PlanOptions {
  let mut options = PlanOptions::new(architecture, &args.defaults);
  options.disable = args.disable.clone();
  options.prefer_system = args.always_prefer_system;
  options.no_system = args.no_system.as_deref().map(NoSystem::parse).unwrap_or_default();
  options
}

/// Resolve and schedule `packages` with the recipes in `args`.
pub(crate) fn plan_packages(
  packages: &[String],
  args: &RecipeArgs,
  options: &PlanOptions,
  scm: &dyn Scm,
) -> Result<Plan> {
  let dir = config_dir(args)?;
  let store = RecipeStore::new(&dir, scm);
  Ok(plan(packages, &store, options, &ShellCheck)?)
}
