//! Source-control queries needed to identify build inputs.
//!
//! The orchestrator never clones or fetches on its own; it only asks which
//! commits a repository's refs point to, what a local checkout is at, and
//! whether that checkout has uncommitted changes.

pub mod git;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

pub use git::GitScm;

/// Errors from source-control queries.
#[derive(Debug, Error)]
pub enum ScmError {
  #[error("failed to run git: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("git {args} failed: {stderr}")]
  CommandFailed { args: String, stderr: String },

  #[error("unexpected output from git {args}: {output}")]
  UnexpectedOutput { args: String, output: String },
}

/// Uncommitted state of a working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalChanges {
  /// Diff of tracked files against `HEAD`.
  pub diff: String,
  /// Whether untracked files are present.
  pub untracked: bool,
}

impl LocalChanges {
  pub fn is_clean(&self) -> bool {
    self.diff.is_empty() && !self.untracked
  }
}

/// Source-control backend.
pub trait Scm {
  /// Every ref a repository advertises, mapped to the commit it points at.
  ///
  /// Annotated tags are reported with the commit they peel to.
  fn resolve_refs(&self, source: &str) -> Result<BTreeMap<String, String>, ScmError>;

  /// Commit currently checked out in `dir`.
  fn checked_out_commit(&self, dir: &Path) -> Result<String, ScmError>;

  /// Branch checked out in `dir`, or the commit when `HEAD` is detached.
  fn branch_or_ref(&self, dir: &Path) -> Result<String, ScmError>;

  /// Uncommitted modifications in `dir`.
  fn local_changes(&self, dir: &Path) -> Result<LocalChanges, ScmError>;

  /// Contents of `file` at `git_ref` in the repository at `repo`.
  fn read_file_at_ref(&self, repo: &Path, git_ref: &str, file: &str) -> Result<String, ScmError>;
}
