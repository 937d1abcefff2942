//! Implementation of the `kiln doctor` command.

use anyhow::Result;

use kiln_lib::doctor::{DoctorReport, doctor};
use kiln_lib::recipe::RecipeStore;
use kiln_lib::resolve::ShellCheck;
use kiln_lib::scm::GitScm;

use super::{architecture, config_dir, plan_options};
use crate::RecipeArgs;
use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_success, print_warning};

/// Check whether `packages` can be built here, and return the exit code.
pub fn cmd_doctor(packages: &[String], recipes: &RecipeArgs, output: OutputFormat) -> Result<i32> {
  let arch = architecture(recipes)?;
  let options = plan_options(recipes, &arch);
  let dir = config_dir(recipes)?;
  let store = RecipeStore::new(&dir, &GitScm);
  let report = doctor(packages, &store, &options, &ShellCheck)?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, &arch);
  }
  Ok(report.exit_code())
}

fn print_report(report: &DoctorReport, arch: &str) {
  println!("Architecture: {arch}");
  for name in &report.missing_recipes {
    print_warning(&format!("Cannot find a recipe for {name}; skipped"));
  }

  if !report.system_packages.is_empty() {
    print_info("Taken from the system:");
    for name in &report.system_packages {
      print_stat("system", name);
    }
  }
  if !report.own_packages.is_empty() {
    print_info("Built even though the system may provide them:");
    for name in &report.own_packages {
      print_stat("own", name);
    }
  }
  if !report.always_built.is_empty() {
    print_info("Always built:");
    for name in &report.always_built {
      print_stat("built", name);
    }
  }

  if !report.failed_requirements.is_empty() {
    print_error("Missing system requirements:");
    for failed in &report.failed_requirements {
      print_stat(&failed.package, failed.hint.as_deref().unwrap_or("no hint in the recipe"));
    }
  }

  if report.incompatible_defaults {
    print_error("The requested packages accept disjoint sets of defaults");
  } else if let Some(valid) = &report.valid_defaults {
    if report.defaults_ok() {
      print_stat("valid defaults", &valid.join(", "));
    } else {
      print_error(&format!(
        "Defaults \"{}\" cannot build these packages; use one of: {}",
        report.defaults,
        valid.join(", ")
      ));
    }
  }

  if report.exit_code() == 0 {
    print_success("Everything can be built");
  }
}
