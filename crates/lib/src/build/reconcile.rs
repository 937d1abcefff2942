//! The build loop.
//!
//! Packages are visited in build order. Each visit hashes the head package,
//! settles its revision against what the store already holds and then either
//! accepts the existing install tree or hands the package to the executor.
//! A head without a reusable revision is visited twice: once to fetch what
//! the remote store has for it, and once more to assign a fresh revision.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::{BUILD_HASH_MARKER, DEFAULTS_PACKAGE, DEVEL_SUCCESS_MARKER, MAX_STALLED_ITERATIONS};
use crate::hash::{HashError, compute_hashes};
use crate::spec::{PackageSpec, SpecArena};
use crate::store::{Layout, StoreError};
use crate::store::artifacts::{discover, next_revision, select};
use crate::store::links::{cleanup_after_build, publish, remove_dir_if_exists};
use crate::sync::RemoteSync;

use super::execute::{BuildExecutor, ExecuteError};
use super::types::{BuildError, BuildRequest, PackageOutcome, RunOptions, RunReport};

/// Counts consecutive visits of the same head package.
#[derive(Debug)]
pub struct IterationGuard {
  limit: usize,
  head: Option<String>,
  visits: usize,
}

impl IterationGuard {
  pub fn new(limit: usize) -> Self {
    Self {
      limit,
      head: None,
      visits: 0,
    }
  }

  /// Record a visit of `package`, failing once it was visited more than
  /// `limit` times in a row.
  pub fn visit(&mut self, package: &str) -> Result<(), BuildError> {
    if self.head.as_deref() == Some(package) {
      self.visits += 1;
    } else {
      self.head = Some(package.to_string());
      self.visits = 1;
    }
    if self.visits > self.limit {
      return Err(BuildError::Livelock {
        package: package.to_string(),
      });
    }
    Ok(())
  }
}

enum Visit {
  /// Visit the same head again.
  Again,
  Done(PackageOutcome),
}

struct Reconciler<'a, E> {
  specs: &'a mut SpecArena,
  options: &'a RunOptions,
  layout: Layout,
  sync: &'a dyn RemoteSync,
  executor: &'a E,
  writes_enabled: bool,
  synced: HashSet<String>,
}

/// Bring every package of `order` up to date.
///
/// `order` must list dependencies before their dependents and every name in
/// it must be in `specs`.
pub async fn run<E: BuildExecutor>(
  order: &[String],
  specs: &mut SpecArena,
  options: &RunOptions,
  sync: &dyn RemoteSync,
  executor: &E,
) -> Result<RunReport, BuildError> {
  if order.is_empty() {
    return Ok(RunReport {
      outcome: Vec::new(),
      message: "Nothing to be done.".to_string(),
      exit_code: 0,
    });
  }

  let mut reconciler = Reconciler {
    specs,
    options,
    layout: options.layout(),
    sync,
    executor,
    writes_enabled: sync.is_writable(),
    synced: HashSet::new(),
  };

  let mut queue: VecDeque<&String> = order.iter().collect();
  let mut guard = IterationGuard::new(MAX_STALLED_ITERATIONS);
  let mut outcome = Vec::with_capacity(order.len());
  while let Some(package) = queue.front().copied() {
    guard.visit(package)?;
    match reconciler.visit(package).await? {
      Visit::Again => debug!(package = %package, "visiting again"),
      Visit::Done(result) => {
        queue.pop_front();
        outcome.push((package.clone(), result));
      }
    }
  }

  let message = completion_message(order, reconciler.specs, &reconciler.layout);
  Ok(RunReport {
    outcome,
    message,
    exit_code: 0,
  })
}

impl<E: BuildExecutor> Reconciler<'_, E> {
  fn spec(&self, package: &str) -> Result<&PackageSpec, BuildError> {
    self
      .specs
      .get(package)
      .ok_or_else(|| HashError::UnknownPackage(package.to_string()).into())
  }

  async fn visit(&mut self, package: &str) -> Result<Visit, BuildError> {
    compute_hashes(package, self.specs, self.options.consider_relocation)?;

    if self.spec(package)?.is_devel_pkg && self.writes_enabled {
      warn!(package = %package, "development package; disabling uploads to the remote store for the rest of the run");
      self.writes_enabled = false;
    }
    if self.spec(package)?.revision.is_none() && !self.assign_revision(package)? {
      return Ok(Visit::Again);
    }

    let spec = self.spec(package)?;
    let Some(hash) = spec.hash.as_deref() else {
      return Err(
        StoreError::Unassigned {
          package: package.to_string(),
        }
        .into(),
      );
    };

    if spec.is_devel_pkg {
      let expected = format!(
        "{}{}",
        spec.devel_hash.as_deref().unwrap_or(""),
        spec.hashes.as_ref().map(|h| h.deps_hash.as_str()).unwrap_or("")
      );
      let marker = self.layout.build_dir(hash, package).join(DEVEL_SUCCESS_MARKER);
      if read_marker(&marker).as_deref() == Some(expected.as_str()) {
        info!(package = %package, "development package does not need a rebuild");
        publish(&self.layout, spec, self.specs)?;
        return Ok(Visit::Done(PackageOutcome::DevelUnchanged));
      }
    } else {
      let install_dir = self.layout.install_dir(spec)?;
      match read_marker(&install_dir.join(BUILD_HASH_MARKER)) {
        Some(previous) if previous == hash => {
          debug!(package = %package, install_dir = %install_dir.display(), "already installed");
          publish(&self.layout, spec, self.specs)?;
          if self.options.cleanup {
            cleanup_after_build(&self.layout, spec, self.options.aggressive_cleanup);
          }
          return Ok(Visit::Done(PackageOutcome::UpToDate));
        }
        Some(previous) => {
          debug!(package = %package, installed = %previous, wanted = %hash, "installed build has a different hash; redoing");
        }
        None => {}
      }
    }

    self.build(spec, hash).await
  }

  /// Settle the revision and hash of `package`. Returns `false` when the
  /// package should be visited again after fetching from the remote store.
  fn assign_revision(&mut self, package: &str) -> Result<bool, BuildError> {
    let spec = self.spec(package)?;
    let artifacts = discover(&self.layout, package, &spec.version)?;
    let Some(hashes) = spec.hashes.clone() else {
      return Err(HashError::UnknownPackage(package.to_string()).into());
    };

    let (revision, hash, obsolete) = match select(&artifacts, &hashes, self.writes_enabled) {
      Some(artifact) => {
        let obsolete = (spec.is_devel_pkg && spec.incremental_recipe.is_some()).then(|| artifact.link.clone());
        debug!(package = %package, revision = %artifact.revision, hash = %artifact.hash, "reusing existing revision");
        (artifact.revision, artifact.hash.clone(), obsolete)
      }
      None if !self.synced.contains(package) => {
        if !spec.is_devel_pkg {
          debug!(package = %package, "fetching builds from the remote store");
          if let Err(e) = self.sync.sync_to_local(&self.layout, spec) {
            warn!(package = %package, error = %e, "could not fetch from the remote store");
          }
        }
        self.synced.insert(package.to_string());
        return Ok(false);
      }
      None => {
        let revision = next_revision(&artifacts, !self.writes_enabled);
        let hash = if revision.local {
          hashes.local_revision_hash.clone()
        } else {
          hashes.remote_revision_hash.clone()
        };
        debug!(package = %package, revision = %revision, "assigned new revision");
        (revision, hash, None)
      }
    };

    if let Some(spec) = self.specs.get_mut(package) {
      spec.revision = Some(revision);
      spec.hash = Some(hash);
      spec.obsolete_tarball = obsolete;
    }
    Ok(true)
  }

  async fn build(&self, spec: &PackageSpec, hash: &str) -> Result<Visit, BuildError> {
    let package = spec.package.as_str();
    remove_dir_if_exists(&self.layout.install_dir(spec)?)?;

    let cached = if spec.is_devel_pkg {
      None
    } else {
      cached_tarball(&self.layout.store_dir(hash))
    };
    match &cached {
      Some(tarball) => info!(package = %package, tarball = %tarball.display(), "unpacking"),
      None => info!(package = %package, version = %spec.version, "compiling"),
    }

    let request = BuildRequest {
      spec,
      specs: self.specs,
      layout: &self.layout,
      options: self.options,
      cached_tarball: cached.as_deref(),
    };
    if let Err(source) = self.executor.build(&request).await {
      return Err(BuildError::BuildFailed {
        package: package.to_string(),
        message: failure_message(spec, self.specs, &self.layout, &source),
        source,
      });
    }

    // Development builds keep their build directory: it holds the success marker.
    if self.options.cleanup && !spec.is_devel_pkg {
      cleanup_after_build(&self.layout, spec, self.options.aggressive_cleanup);
    }
    let local = spec.revision.is_some_and(|r| r.local);
    if self.writes_enabled && !spec.is_devel_pkg && !local {
      if let Err(e) = self.sync.sync_to_remote(&self.layout, spec) {
        warn!(package = %package, error = %e, "could not upload to the remote store");
      }
    }
    publish(&self.layout, spec, self.specs)?;

    Ok(Visit::Done(if cached.is_some() {
      PackageOutcome::Unpacked
    } else {
      PackageOutcome::Built
    }))
  }
}

/// First tarball in a store directory, if any.
fn cached_tarball(dir: &Path) -> Option<PathBuf> {
  let mut tarballs: Vec<PathBuf> = std::fs::read_dir(dir)
    .ok()?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| path.to_string_lossy().ends_with("gz"))
    .collect();
  tarballs.sort();
  tarballs.into_iter().next()
}

/// Contents of a marker file without trailing newlines.
fn read_marker(path: &Path) -> Option<String> {
  std::fs::read_to_string(path)
    .ok()
    .map(|text| text.trim_end_matches('\n').to_string())
}

fn failure_message(spec: &PackageSpec, specs: &SpecArena, layout: &Layout, error: &ExecuteError) -> String {
  let mut message = format!(
    "Error while building {} {}: {error}\nBuild directory is {}.",
    spec.package,
    spec.version_revision().unwrap_or_else(|| spec.version.clone()),
    layout
      .build_dir(spec.hash.as_deref().unwrap_or(""), &spec.package)
      .display(),
  );

  let mut updatable: Vec<&PackageSpec> = spec
    .requires
    .iter()
    .filter_map(|dep| specs.get(dep))
    .filter(|dep| dep.is_devel_pkg)
    .collect();
  if spec.is_devel_pkg {
    updatable.push(spec);
  }
  if !updatable.is_empty() {
    message.push_str(
      "\n\nSome packages are in development mode and their sources are not updated automatically.\n\
       The failure might come from outdated sources. To update them, run:\n",
    );
    for dep in updatable {
      let dir = dep.source.as_deref().unwrap_or(&dep.package);
      message.push_str(&format!("\n  ( cd {dir} && git pull --rebase )"));
    }
  }
  message
}

fn completion_message(order: &[String], specs: &SpecArena, layout: &Layout) -> String {
  let Some(main) = order.iter().rev().find(|p| p.as_str() != DEFAULTS_PACKAGE).or(order.last()) else {
    return "Nothing to be done.".to_string();
  };
  let family = specs.get(main).map(|s| s.build_family.as_str()).unwrap_or("");
  let latest = if family.is_empty() {
    "latest".to_string()
  } else {
    format!("latest-{family}")
  };
  let mut message = format!(
    "Build of {main} successfully completed.\nYour software installation is at:\n\n  {}\n\nLoad its environment from:\n\n  {}/{main}/{latest}/etc/profile.d/init.sh",
    layout.work_dir().join(layout.architecture()).display(),
    layout.work_dir().join(layout.architecture()).display(),
  );
  for spec in specs.iter().filter(|s| s.is_devel_pkg) {
    message.push_str(&format!(
      "\n\nBuild directory for development package {}:\n  {}/{}",
      spec.package,
      layout
        .build_latest_link(&spec.package, spec.devel_prefix.as_deref().filter(|p| !p.is_empty()))
        .display(),
      spec.package,
    ));
  }
  message
}
