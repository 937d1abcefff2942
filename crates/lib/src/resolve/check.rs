//! Running `prefer_system_check` and `system_requirement_check` snippets.

use std::process::Command;

use tracing::debug;

/// Exit code and combined output of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
  pub code: i32,
  pub output: String,
}

impl CheckOutput {
  pub fn success(&self) -> bool {
    self.code == 0
  }
}

/// Runs a recipe's system check snippet.
pub trait SystemCheck {
  fn check(&self, package: &str, command: &str) -> std::io::Result<CheckOutput>;
}

impl<F> SystemCheck for F
where
  F: Fn(&str, &str) -> std::io::Result<CheckOutput>,
{
  fn check(&self, package: &str, command: &str) -> std::io::Result<CheckOutput> {
    self(package, command)
  }
}

/// Runs checks with `bash -c` inside a fresh temporary directory, so a
/// check cannot leave files behind in the caller's working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCheck;

impl SystemCheck for ShellCheck {
  fn check(&self, package: &str, command: &str) -> std::io::Result<CheckOutput> {
    let dir = tempfile::tempdir()?;
    debug!(package = %package, dir = ?dir.path(), "running system check");

    let output = Command::new("bash")
      .arg("-c")
      .arg(format!("exec 2>&1\n{command}"))
      .current_dir(dir.path())
      .output()?;

    let code = output.status.code().unwrap_or(-1);
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    debug!(package = %package, code, output = %text.trim(), "system check finished");
    Ok(CheckOutput { code, output: text })
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;

  #[test]
  fn captures_exit_code_and_merged_output() {
    let out = ShellCheck.check("foo", "echo out; echo err >&2; exit 3").unwrap();
    assert_eq!(out.code, 3);
    assert!(out.output.contains("out"));
    assert!(out.output.contains("err"));
  }

  #[test]
  fn runs_outside_the_current_directory() {
    let cwd = std::env::current_dir().unwrap();
    let out = ShellCheck.check("foo", "pwd").unwrap();
    assert!(out.success());
    assert_ne!(std::path::Path::new(out.output.trim()), cwd);
  }
}
