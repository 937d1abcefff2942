//! Reclaiming space in a work directory.
//!
//! A build directory survives as long as a `BUILD/<pkg>-latest*` link names
//! it, and an install tree as long as one of its package's `latest*` links
//! resolves to it. Everything else under `BUILD/` and `<arch>/<pkg>/` is left
//! over from earlier builds. `TMP/` and `INSTALLROOT/` are always scratch.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Layout, StoreError};

/// What a clean removed, or would remove on a dry run.
#[derive(Debug, Default, Serialize)]
pub struct CleanResult {
  pub dry_run: bool,
  pub removed: Vec<PathBuf>,
  pub failed: Vec<PathBuf>,
}

impl CleanResult {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Paths that a clean of `layout` would delete, without touching anything.
///
/// With `aggressive`, the artifact store of the architecture and every
/// checked out source go as well.
pub fn decide_clean(layout: &Layout, aggressive: bool) -> Result<Vec<PathBuf>, StoreError> {
  let work_dir = layout.work_dir();
  let mut candidates = vec![work_dir.join("TMP"), work_dir.join("INSTALLROOT")];
  if aggressive {
    candidates.push(layout.tars_dir().join("store"));
    candidates.push(work_dir.join("SOURCES"));
  }
  candidates.extend(stale_build_dirs(&work_dir.join("BUILD"))?);
  candidates.extend(stale_install_dirs(&work_dir.join(layout.architecture()))?);

  Ok(candidates.into_iter().filter(|p| p.exists()).collect())
}

/// Delete what [`decide_clean`] selects. A dry run only reports it.
pub fn clean(layout: &Layout, aggressive: bool, dry_run: bool) -> Result<CleanResult, StoreError> {
  let paths = decide_clean(layout, aggressive)?;
  let mut result = CleanResult {
    dry_run,
    ..Default::default()
  };

  for path in paths {
    if dry_run {
      result.removed.push(path);
      continue;
    }
    debug!(path = %path.display(), "removing");
    match remove(&path) {
      Ok(()) => result.removed.push(path),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "unable to delete");
        result.failed.push(path);
      }
    }
  }

  info!(
    removed = result.removed.len(),
    failed = result.failed.len(),
    dry_run,
    "work directory cleaned"
  );
  Ok(result)
}

/// Directories under `BUILD/` that no `*-latest*` link points to.
fn stale_build_dirs(build: &Path) -> Result<Vec<PathBuf>, StoreError> {
  let entries = list_dir(build)?;
  let linked: BTreeSet<OsString> = entries
    .iter()
    .filter(|p| is_symlink(p) && file_name(p).contains("-latest"))
    .filter_map(|p| std::fs::read_link(p).ok())
    .filter_map(|target| target.file_name().map(OsString::from))
    .collect();

  Ok(
    entries
      .into_iter()
      .filter(|p| !is_symlink(p))
      .filter(|p| p.file_name().is_some_and(|n| !linked.contains(n)))
      .collect(),
  )
}

/// Install trees under `<arch>/<pkg>/` that no `latest*` link resolves to.
fn stale_install_dirs(arch_dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
  let mut stale = Vec::new();
  for package_dir in list_dir(arch_dir)?.into_iter().filter(|p| p.is_dir()) {
    let entries = list_dir(&package_dir)?;
    let live: BTreeSet<PathBuf> = entries
      .iter()
      .filter(|p| is_symlink(p) && file_name(p).starts_with("latest"))
      .filter_map(|p| std::fs::canonicalize(p).ok())
      .collect();

    for entry in entries {
      if is_symlink(&entry) || !entry.is_dir() {
        continue;
      }
      let reached = std::fs::canonicalize(&entry).is_ok_and(|real| live.contains(&real));
      if !reached {
        stale.push(entry);
      }
    }
  }
  Ok(stale)
}

/// Entries of `dir`, sorted. A missing directory has none.
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(StoreError::io(dir)(e)),
  };
  let mut paths = entries
    .map(|entry| entry.map(|e| e.path()))
    .collect::<io::Result<Vec<_>>>()
    .map_err(StoreError::io(dir))?;
  paths.sort();
  Ok(paths)
}

fn is_symlink(path: &Path) -> bool {
  path.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink())
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}

fn remove(path: &Path) -> io::Result<()> {
  if path.is_dir() && !is_symlink(path) {
    std::fs::remove_dir_all(path)
  } else {
    std::fs::remove_file(path)
  }
}
