//! Implementation of the `kiln clean` command.

use std::path::PathBuf;

use anyhow::Result;

use kiln_lib::platform::paths;
use kiln_lib::store::Layout;
use kiln_lib::store::clean::clean;

use super::architecture_or_detect;
use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_success};

/// Remove what earlier builds left behind in the work directory.
///
/// Returns the exit code: `1` when some path could not be deleted.
pub fn cmd_clean(
  work_dir: Option<PathBuf>,
  architecture: Option<&str>,
  aggressive: bool,
  dry_run: bool,
  output: OutputFormat,
) -> Result<i32> {
  let arch = architecture_or_detect(architecture)?;
  let work_dir = work_dir.unwrap_or_else(paths::work_dir);
  let result = clean(&Layout::new(&work_dir, &arch), aggressive, dry_run)?;
  let code = if result.is_success() { 0 } else { 1 };

  if output.is_json() {
    print_json(&result)?;
    return Ok(code);
  }

  if result.removed.is_empty() && result.failed.is_empty() {
    print_success("Nothing to delete.");
    return Ok(code);
  }

  let label = if dry_run { "would delete" } else { "deleted" };
  for path in &result.removed {
    print_stat(label, &path.display().to_string());
  }
  for path in &result.failed {
    print_error(&format!("Unable to delete {}", path.display()));
  }
  if dry_run {
    print_info("Dry run - no changes made");
  } else if result.is_success() {
    print_success("Work directory cleaned");
  }
  Ok(code)
}
