//! [`Scm`] backed by the `git` command-line client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{LocalChanges, Scm, ScmError};

/// Builder for a single `git` invocation.
struct GitCommand {
  args: Vec<String>,
  dir: Option<PathBuf>,
}

impl GitCommand {
  fn new<I, S>(args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      args: args.into_iter().map(Into::into).collect(),
      dir: None,
    }
  }

  fn current_dir(mut self, dir: &Path) -> Self {
    self.dir = Some(dir.to_path_buf());
    self
  }

  /// Run the command and return its stdout. A non-zero exit is an error.
  fn stdout(self) -> Result<String, ScmError> {
    let mut command = Command::new("git");
    command.args(&self.args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = &self.dir {
      command.current_dir(dir);
    }

    debug!(args = %self.args.join(" "), dir = ?self.dir, "running git");
    let output = command.output()?;
    if !output.status.success() {
      return Err(ScmError::CommandFailed {
        args: self.args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
  }
}

/// Source control through the `git` binary on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitScm;

impl Scm for GitScm {
  fn resolve_refs(&self, source: &str) -> Result<BTreeMap<String, String>, ScmError> {
    let output = GitCommand::new(["ls-remote", source]).stdout()?;
    parse_ls_remote(&output)
  }

  fn checked_out_commit(&self, dir: &Path) -> Result<String, ScmError> {
    let output = GitCommand::new(["rev-parse", "HEAD"]).current_dir(dir).stdout()?;
    Ok(output.trim().to_string())
  }

  fn branch_or_ref(&self, dir: &Path) -> Result<String, ScmError> {
    match GitCommand::new(["symbolic-ref", "-q", "--short", "HEAD"])
      .current_dir(dir)
      .stdout()
    {
      Ok(branch) if !branch.trim().is_empty() => Ok(branch.trim().to_string()),
      _ => self.checked_out_commit(dir),
    }
  }

  fn local_changes(&self, dir: &Path) -> Result<LocalChanges, ScmError> {
    let diff = GitCommand::new(["diff", "HEAD"]).current_dir(dir).stdout()?;
    let status = GitCommand::new(["status", "--porcelain"]).current_dir(dir).stdout()?;
    Ok(LocalChanges {
      diff,
      untracked: status.lines().any(|l| l.starts_with("??")),
    })
  }

  fn read_file_at_ref(&self, repo: &Path, git_ref: &str, file: &str) -> Result<String, ScmError> {
    GitCommand::new(["show".to_string(), format!("{git_ref}:{file}")])
      .current_dir(repo)
      .stdout()
  }
}

/// Parse `git ls-remote` output into `{ref: commit}`.
///
/// Peeled entries (`refs/tags/v1^{}`) replace the tag object id with the
/// commit it points to.
fn parse_ls_remote(output: &str) -> Result<BTreeMap<String, String>, ScmError> {
  let mut refs = BTreeMap::new();
  for line in output.lines().filter(|l| !l.trim().is_empty()) {
    let Some((commit, name)) = line.split_once('\t') else {
      return Err(ScmError::UnexpectedOutput {
        args: "ls-remote".to_string(),
        output: line.to_string(),
      });
    };
    match name.strip_suffix("^{}") {
      Some(tag) => {
        refs.insert(tag.to_string(), commit.to_string());
      }
      None => {
        refs.entry(name.to_string()).or_insert_with(|| commit.to_string());
      }
    }
  }
  Ok(refs)
}
