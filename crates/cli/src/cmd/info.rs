//! Implementation of the `kiln info` command.

use anyhow::Result;
use serde::Serialize;

use kiln_lib::consts::DEFAULTS_PACKAGE;
use kiln_lib::schedule::DependencyGraph;
use kiln_lib::scm::GitScm;
use kiln_lib::spec::{PackageSpec, Requirement};

use super::{architecture, plan_options, plan_packages};
use crate::RecipeArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct InfoReport<'a> {
  architecture: &'a str,
  build_order: &'a [String],
  system_packages: Vec<&'a str>,
  own_packages: Vec<&'a str>,
  disabled: Vec<&'a str>,
  packages: Vec<&'a PackageSpec>,
}

/// Show the detected architecture and, for `packages`, how they resolve.
pub fn cmd_info(packages: &[String], recipes: &RecipeArgs, output: OutputFormat) -> Result<()> {
  let arch = architecture(recipes)?;
  if packages.is_empty() {
    if output.is_json() {
      print_json(&serde_json::json!({ "architecture": arch }))?;
    } else {
      println!("Architecture: {arch}");
    }
    return Ok(());
  }

  let options = plan_options(recipes, &arch);
  let plan = plan_packages(packages, recipes, &options, &GitScm)?;
  let specs: Vec<&PackageSpec> = plan
    .order
    .iter()
    .filter_map(|name| plan.specs.get(name))
    .filter(|spec| spec.package != DEFAULTS_PACKAGE)
    .collect();

  if output.is_json() {
    let report = InfoReport {
      architecture: &arch,
      build_order: &plan.order,
      system_packages: plan.system_packages.iter().map(String::as_str).collect(),
      own_packages: plan.own_packages.iter().map(String::as_str).collect(),
      disabled: plan.disabled.iter().map(String::as_str).collect(),
      packages: specs,
    };
    return print_json(&report);
  }

  println!("Architecture: {arch}");
  println!("Build order: {}", plan.order.join(" "));
  if !plan.system_packages.is_empty() {
    println!("Taken from the system: {}", join(&plan.system_packages));
  }
  if !plan.own_packages.is_empty() {
    println!("Built even though the system may provide them: {}", join(&plan.own_packages));
  }
  if !plan.disabled.is_empty() {
    println!("Disabled: {}", join(&plan.disabled));
  }
  println!();
  let graph = DependencyGraph::from_specs(&plan.specs);
  for spec in specs {
    print_info(&spec.package);
    print_stat("version", &spec.version);
    print_stat("requirement", requirement_label(spec.requirement));
    if !spec.requires.is_empty() {
      print_stat("requires", &spec.requires.join(", "));
    }
    if !spec.build_requires.is_empty() {
      print_stat("build requires", &spec.build_requires.join(", "));
    }
    let dependents = graph.dependents(&spec.package);
    if !dependents.is_empty() {
      print_stat("required by", &dependents.join(", "));
    }
    if let Some(source) = &spec.source {
      print_stat("source", source);
    }
  }
  Ok(())
}

fn join(names: &std::collections::BTreeSet<String>) -> String {
  names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn requirement_label(requirement: Requirement) -> &'static str {
  match requirement {
    Requirement::Own => "built from recipe",
    Requirement::System => "taken from the system",
    Requirement::Replacement { has_recipe: true } => "replacement recipe",
    Requirement::Replacement { has_recipe: false } => "replaced by the system",
  }
}
