//! Implementation of the `kiln build` command.
//!
//! Resolves the requested packages, prepares their source-control state and
//! runs the build loop, reusing or unpacking whatever the work directory and
//! the remote store already hold.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::debug;

use kiln_lib::build::{PackageOutcome, RunOptions, ShellExecutor, run};
use kiln_lib::consts::DEFAULTS_PACKAGE;
use kiln_lib::platform::paths;
use kiln_lib::prepare::{PrepareOptions, prepare};
use kiln_lib::scm::{GitScm, Scm};
use kiln_lib::sync::remote_from_url;

use super::{architecture, config_dir, plan_options, plan_packages};
use crate::RecipeArgs;
use crate::output::{OutputFormat, format_duration, print_error, print_info, print_json, print_success, print_warning};

pub struct BuildArgs {
  pub packages: Vec<String>,
  pub recipes: RecipeArgs,
  pub work_dir: Option<PathBuf>,
  pub remote_store: Option<String>,
  pub jobs: Option<usize>,
  pub environment: Vec<String>,
  pub force_rebuild: Vec<String>,
  pub devel_prefix: Option<String>,
  pub no_local: Vec<String>,
  pub force_tracked: bool,
  pub aggressive_cleanup: bool,
  pub no_auto_cleanup: bool,
  pub output: OutputFormat,
}

/// Execute the build command. Returns the process exit code.
pub fn cmd_build(args: BuildArgs) -> Result<i32> {
  let started = Instant::now();
  let arch = architecture(&args.recipes)?;
  let config = config_dir(&args.recipes)?;
  let work_dir = args.work_dir.clone().unwrap_or_else(paths::work_dir);
  let remote = args.remote_store.clone().or_else(paths::remote_store);
  let extra_env = parse_environment(&args.environment)?;
  debug!(architecture = %arch, work_dir = %work_dir.display(), "starting build");

  let scm = GitScm;
  let mut plan_opts = plan_options(&args.recipes, &arch);
  plan_opts.force_rebuild = args.force_rebuild.clone();
  let mut plan = plan_packages(&args.packages, &args.recipes, &plan_opts, &scm)?;

  let devel_root = std::env::current_dir().context("Failed to read the current directory")?;
  let mut prepare_opts = PrepareOptions::new(&config, devel_root, &args.recipes.defaults);
  prepare_opts.devel_prefix = args.devel_prefix.clone();
  prepare_opts.no_local = args.no_local.clone();
  prepare_opts.force_tracked = args.force_tracked;
  prepare(&mut plan.specs, &plan.order, &scm, &prepare_opts)?;

  let devel: Vec<&str> = plan
    .specs
    .iter()
    .filter(|s| s.is_devel_pkg)
    .map(|s| s.package.as_str())
    .collect();
  if !devel.is_empty() && !args.output.is_json() {
    print_warning(&format!(
      "Packages in development mode: {}. Their sources are not updated automatically; use `git pull --rebase` in each checkout.",
      devel.join(", ")
    ));
  }

  let mut options = RunOptions::new(&work_dir, &arch, &args.recipes.defaults);
  options.config_dir = config.clone();
  options.recipes_commit = scm.checked_out_commit(&config).ok();
  if let Some(jobs) = args.jobs {
    options.jobs = jobs;
  }
  options.aggressive_cleanup = args.aggressive_cleanup;
  options.cleanup = !args.no_auto_cleanup;
  options.extra_env = extra_env;

  let sync = remote_from_url(remote.as_deref()).context("Invalid remote store")?;
  let executor = ShellExecutor::default();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(run(&plan.order, &mut plan.specs, &options, sync.as_ref(), &executor));

  let report = match result {
    Ok(report) => report,
    Err(e) => {
      print_error(&e.to_string());
      return Ok(1);
    }
  };

  if args.output.is_json() {
    print_json(&report)?;
    return Ok(report.exit_code);
  }

  for (package, outcome) in report.outcome.iter().filter(|(p, _)| p != DEFAULTS_PACKAGE) {
    let action = match outcome {
      PackageOutcome::UpToDate => "up to date",
      PackageOutcome::DevelUnchanged => "unchanged development package",
      PackageOutcome::Unpacked => "unpacked",
      PackageOutcome::Built => "built",
    };
    print_info(&format!("{package}: {action}"));
  }
  println!();
  println!("{}", report.message);
  print_success(&format!("Done in {}", format_duration(started.elapsed())));
  Ok(report.exit_code)
}

/// Parse `-e KEY=VALUE` arguments.
fn parse_environment(values: &[String]) -> Result<Vec<(String, String)>> {
  values
    .iter()
    .map(|value| match value.split_once('=') {
      Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
      _ => bail!("Invalid environment entry '{value}', expected KEY=VALUE"),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn environment_entries_split_at_first_equals() {
    let parsed = parse_environment(&["CXXFLAGS=-O2 -g".to_string(), "A=b=c".to_string()]).unwrap();
    assert_eq!(
      parsed,
      vec![
        ("CXXFLAGS".to_string(), "-O2 -g".to_string()),
        ("A".to_string(), "b=c".to_string())
      ]
    );
  }

  #[test]
  fn environment_entry_needs_a_key() {
    assert!(parse_environment(&["=1".to_string()]).is_err());
    assert!(parse_environment(&["NOVALUE".to_string()]).is_err());
  }
}
