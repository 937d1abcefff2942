use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::defaults::DefaultsError;
use crate::hash::HashError;
use crate::prepare::PrepareError;
use crate::recipe::RecipeError;
use crate::resolve::ResolveError;
use crate::schedule::ScheduleError;
use crate::scm::ScmError;
use crate::spec::{PackageSpec, SpecArena};
use crate::store::{Layout, StoreError};
use crate::sync::SyncError;

use super::execute::ExecuteError;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Defaults(#[from] DefaultsError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Schedule(#[from] ScheduleError),

  #[error(transparent)]
  Prepare(#[from] PrepareError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Scm(#[from] ScmError),

  #[error(transparent)]
  Sync(#[from] SyncError),

  #[error("{message}")]
  BuildFailed {
    package: String,
    message: String,
    #[source]
    source: ExecuteError,
  },

  #[error("{message}")]
  IncompatibleDefaults { defaults: String, message: String },

  #[error("the requested packages do not share any valid defaults")]
  NoValidDefaults,

  #[error("{message}")]
  FailedRequirements { packages: Vec<String>, message: String },

  #[error(
    "too many attempts to process {package} without progress; something is wrong with the recipe repository"
  )]
  Livelock { package: String },
}

/// Settings of a reconciliation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
  pub work_dir: PathBuf,
  pub architecture: String,
  pub defaults: String,
  /// Recipe repository, recorded in provenance and exposed to build scripts.
  pub config_dir: PathBuf,
  /// Commit of the recipe repository, when known.
  pub recipes_commit: Option<String>,
  pub jobs: usize,
  /// Remove checked out sources after each build as well.
  pub aggressive_cleanup: bool,
  /// Remove build and staging directories after each build.
  pub cleanup: bool,
  /// Fold declared relocation paths into hashes.
  pub consider_relocation: bool,
  /// Extra `KEY=VALUE` variables for build scripts.
  pub extra_env: Vec<(String, String)>,
}

impl RunOptions {
  pub fn new(work_dir: impl Into<PathBuf>, architecture: impl Into<String>, defaults: impl Into<String>) -> Self {
    let architecture = architecture.into();
    Self {
      work_dir: work_dir.into(),
      consider_relocation: architecture.starts_with("osx"),
      architecture,
      defaults: defaults.into(),
      config_dir: PathBuf::from("."),
      recipes_commit: None,
      jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
      aggressive_cleanup: false,
      cleanup: true,
      extra_env: Vec::new(),
    }
  }

  pub fn layout(&self) -> Layout {
    Layout::new(&self.work_dir, &self.architecture)
  }
}

/// Everything the executor needs to build or unpack one package.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
  pub spec: &'a PackageSpec,
  pub specs: &'a SpecArena,
  pub layout: &'a Layout,
  pub options: &'a RunOptions,
  /// A store tarball with the wanted hash, to unpack instead of building.
  pub cached_tarball: Option<&'a std::path::Path>,
}

/// How a package was handled by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOutcome {
  /// The install tree was already correct.
  UpToDate,
  /// A development build whose sources and dependencies did not change.
  DevelUnchanged,
  /// Unpacked from a cached tarball.
  Unpacked,
  /// Built from its recipe.
  Built,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub outcome: Vec<(String, PackageOutcome)>,
  pub message: String,
  pub exit_code: i32,
}

impl RunReport {
  /// Packages the executor was invoked for.
  pub fn executed(&self) -> impl Iterator<Item = &str> {
    self
      .outcome
      .iter()
      .filter(|(_, o)| matches!(o, PackageOutcome::Built | PackageOutcome::Unpacked))
      .map(|(p, _)| p.as_str())
  }
}
