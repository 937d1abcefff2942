//! Implementation of the `kiln deps` command.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::graph::render_dot;
use kiln_lib::scm::GitScm;

use super::{architecture, plan_options, plan_packages};
use crate::RecipeArgs;
use crate::output::print_success;

/// Print the dependency graph of `package`, or write it to `outdot`.
pub fn cmd_deps(package: &str, recipes: &RecipeArgs, outdot: Option<&Path>) -> Result<()> {
  let arch = architecture(recipes)?;
  let options = plan_options(recipes, &arch);
  let plan = plan_packages(&[package.to_string()], recipes, &options, &GitScm)?;
  let dot = render_dot(&plan.specs, package);

  match outdot {
    Some(path) => {
      std::fs::write(path, dot).with_context(|| format!("Failed to write {}", path.display()))?;
      print_success(&format!("Dependency graph written to {}", path.display()));
    }
    None => print!("{dot}"),
  }
  Ok(())
}
