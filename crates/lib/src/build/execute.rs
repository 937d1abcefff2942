//! Running one package build.
//!
//! The executor either unpacks a cached tarball or runs the recipe through
//! a generated `build.sh`, then turns the staged install tree into a store
//! tarball and moves it into place.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{BUILD_HASH_MARKER, DEVEL_SUCCESS_MARKER};
use crate::spec::PackageSpec;
use crate::store::links::{link_tarball, remove_dir_if_exists};
use crate::store::{StoreError, assigned, tarball};

use super::environment::{BuildPaths, build_environment, init_script, shell_quote};
use super::provenance::Provenance;
use super::types::BuildRequest;

/// Errors that can occur while building a package.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("build script exited with code {code:?}; see {}", .log.display())]
  ScriptFailed { code: Option<i32>, log: PathBuf },

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to serialize provenance: {0}")]
  Provenance(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExecuteError + '_ {
  move |source| ExecuteError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Builds or unpacks a single package.
///
/// On success the install directory of the package exists with a
/// `.build-hash` marker, and its tarball is linked in the store.
#[allow(async_fn_in_trait)]
pub trait BuildExecutor {
  async fn build(&self, request: &BuildRequest<'_>) -> Result<(), ExecuteError>;
}

/// Runs recipes with bash.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
  bash: PathBuf,
}

impl Default for ShellExecutor {
  fn default() -> Self {
    Self {
      bash: PathBuf::from("bash"),
    }
  }
}

impl ShellExecutor {
  pub fn new(bash: impl Into<PathBuf>) -> Self {
    Self { bash: bash.into() }
  }

  async fn unpack(&self, request: &BuildRequest<'_>, cached: &Path) -> Result<(), ExecuteError> {
    let spec = request.spec;
    let (hash, _) = assigned(spec)?;
    info!(package = %spec.package, tarball = %cached.display(), "unpacking cached tarball");

    let install_dir = request.layout.install_dir(spec)?;
    remove_dir_if_exists(&install_dir)?;
    tarball::unpack(cached, request.layout.work_dir())?;
    write_file(&install_dir.join(BUILD_HASH_MARKER), hash)?;
    link_tarball(request.layout, spec)?;
    Ok(())
  }

  async fn compile(&self, request: &BuildRequest<'_>) -> Result<(), ExecuteError> {
    let spec = request.spec;
    let layout = request.layout;
    let (hash, revision) = assigned(spec)?;
    let prefix = format!(
      "{}/{}/{}-{}",
      layout.architecture(),
      spec.package,
      spec.version,
      revision
    );

    let specs_dir = layout.specs_dir(spec)?;
    let build_dir = layout.build_dir(hash, &spec.package);
    let staging = layout.install_root(hash).join(&prefix);
    for dir in [&specs_dir, &build_dir] {
      std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    remove_dir_if_exists(&staging)?;
    std::fs::create_dir_all(&staging).map_err(io_error(&staging))?;

    let recipe = specs_dir.join(format!("{}.sh", spec.package));
    write_file(&recipe, &spec.recipe)?;
    let incremental = specs_dir.join(format!("{}.incremental.sh", spec.package));
    if let Some(text) = &spec.incremental_recipe {
      write_file(&incremental, text)?;
    }
    let script = specs_dir.join("build.sh");
    write_file(&script, &build_script(request, &recipe, &incremental))?;

    let paths = BuildPaths {
      build_dir: build_dir.display().to_string(),
      install_root: staging.display().to_string(),
      source_dir: source_dir(request),
    };
    let env = build_environment(request, &paths);

    let log_path = build_dir.join("log");
    let log = File::create(&log_path).map_err(io_error(&log_path))?;
    let log_err = log.try_clone().map_err(io_error(&log_path))?;

    info!(package = %spec.package, version = %spec.version, revision = %revision, "building");
    debug!(script = %script.display(), log = %log_path.display(), "running build script");
    let status = Command::new(&self.bash)
      .arg("-e")
      .arg("-x")
      .arg(&script)
      .current_dir(&build_dir)
      .envs(env)
      .stdin(Stdio::null())
      .stdout(Stdio::from(log))
      .stderr(Stdio::from(log_err))
      .status()
      .await
      .map_err(|source| ExecuteError::Spawn {
        program: self.bash.display().to_string(),
        source,
      })?;
    if !status.success() {
      return Err(ExecuteError::ScriptFailed {
        code: status.code(),
        log: log_path,
      });
    }

    let init = staging.join("etc/profile.d/init.sh");
    write_file(
      &init,
      &format!("{}\n", init_script(spec, request.specs, layout.architecture(), true)),
    )?;
    let provenance = Provenance::new(request).to_json()?;
    write_file(&staging.join(".meta/provenance.json"), &provenance)?;
    write_file(&staging.join(BUILD_HASH_MARKER), hash)?;

    tarball::create(&staging, &prefix, &layout.tarball_path(spec)?)?;
    link_tarball(layout, spec)?;

    let install_dir = layout.install_dir(spec)?;
    remove_dir_if_exists(&install_dir)?;
    if let Some(parent) = install_dir.parent() {
      std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    std::fs::rename(&staging, &install_dir).map_err(io_error(&install_dir))?;

    if spec.is_devel_pkg {
      let marker = format!(
        "{}{}",
        spec.devel_hash.as_deref().unwrap_or(""),
        spec.hashes.as_ref().map(|h| h.deps_hash.as_str()).unwrap_or("")
      );
      write_file(&build_dir.join(DEVEL_SUCCESS_MARKER), &marker)?;
    }

    info!(package = %spec.package, install_dir = %install_dir.display(), "build complete");
    Ok(())
  }
}

impl BuildExecutor for ShellExecutor {
  async fn build(&self, request: &BuildRequest<'_>) -> Result<(), ExecuteError> {
    match request.cached_tarball {
      Some(cached) => self.unpack(request, cached).await,
      None => self.compile(request).await,
    }
  }
}

/// Where the sources of `request`'s package are checked out.
fn source_dir(request: &BuildRequest<'_>) -> String {
  let spec = request.spec;
  match &spec.source {
    Some(source) if spec.is_devel_pkg => source.clone(),
    Some(_) => {
      let checkout: String = spec.commit_hash.chars().take(10).collect();
      request
        .layout
        .source_dir(&spec.package)
        .join(&spec.version)
        .join(checkout)
        .display()
        .to_string()
    }
    None => String::new(),
  }
}

fn checkout_ref(spec: &PackageSpec) -> &str {
  if spec.commit_hash.is_empty() || spec.commit_hash == "0" {
    &spec.tag
  } else {
    &spec.commit_hash
  }
}

/// The generated `build.sh`. Variables it uses come from the environment.
fn build_script(request: &BuildRequest<'_>, recipe: &Path, incremental: &Path) -> String {
  let spec = request.spec;
  let deps = init_script(spec, request.specs, request.layout.architecture(), false);
  let run_recipe = if spec.incremental_recipe.is_some() && spec.is_devel_pkg {
    format!(
      "if [ -f \"$BUILDDIR/{DEVEL_SUCCESS_MARKER}\" ]; then\n  . {}\nelse\n  . {}\nfi",
      shell_quote(&incremental.display().to_string()),
      shell_quote(&recipe.display().to_string()),
    )
  } else {
    format!(". {}", shell_quote(&recipe.display().to_string()))
  };

  format!(
    r#"#!/bin/bash
# {package} {version}, generated by kiln.
set -e
{deps}
mkdir -p "$BUILDDIR" "$INSTALLROOT"
if [ -n "$SOURCE0" ] && [ ! -d "$SOURCEDIR" ]; then
  mkdir -p "$(dirname "$SOURCEDIR")"
  git clone --quiet "$SOURCE0" "$SOURCEDIR"
  git -C "$SOURCEDIR" checkout --quiet {checkout}
fi
cd "$BUILDDIR"
{run_recipe}
"#,
    package = spec.package,
    version = spec.version,
    checkout = shell_quote(checkout_ref(spec)),
  )
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExecuteError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(io_error(parent))?;
  }
  std::fs::write(path, contents).map_err(io_error(path))
}
