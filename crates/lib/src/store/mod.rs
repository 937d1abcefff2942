//! The work directory and what lives in it.
//!
//! # Layout
//!
//! ```text
//! <work_dir>/
//! ├── TARS/<arch>/
//! │   ├── store/<hh>/<hash>/<pkg>-<ver>-<rev>.<arch>.tar.gz   # artifacts
//! │   ├── <pkg>/<pkg>-<ver>-<rev>.<arch>.tar.gz               # links into store/
//! │   └── dist{,-direct,-runtime}/<pkg>/<pkg>-<ver>-<rev>/    # links to a package and its deps
//! ├── <arch>/<pkg>/<ver>-<rev>/                               # install trees, with .build-hash
//! ├── <arch>/<pkg>/latest{,-<family>}                         # links to the last install
//! ├── BUILD/<hash>/<pkg>/                                     # build trees and logs
//! ├── INSTALLROOT/<hash>/                                     # staging area
//! ├── SPECS/<arch>/<pkg>/<ver>-<rev>/                         # generated build scripts
//! ├── SOURCES/<pkg>/                                          # checked out sources
//! └── TMP/                                                    # scratch space, always removable
//! ```

pub mod artifacts;
pub mod clean;
pub mod links;
pub mod tarball;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::spec::{PackageSpec, Revision};

/// Errors that can occur while reading or writing the work directory.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{package} has no hash and revision assigned yet")]
  Unassigned { package: String },

  #[error("invalid artifact pattern for {package}: {message}")]
  Pattern { package: String, message: String },
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| StoreError::Io { path, source }
  }
}

/// The hash and revision a spec was assigned, required by every store path
/// that names a concrete build.
pub(crate) fn assigned(spec: &PackageSpec) -> Result<(&str, Revision), StoreError> {
  match (spec.hash.as_deref(), spec.revision) {
    (Some(hash), Some(revision)) => Ok((hash, revision)),
    _ => Err(StoreError::Unassigned {
      package: spec.package.clone(),
    }),
  }
}

/// Paths inside a work directory for one architecture.
#[derive(Debug, Clone)]
pub struct Layout {
  work_dir: PathBuf,
  architecture: String,
}

impl Layout {
  pub fn new(work_dir: impl Into<PathBuf>, architecture: impl Into<String>) -> Self {
    Self {
      work_dir: work_dir.into(),
      architecture: architecture.into(),
    }
  }

  pub fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  pub fn architecture(&self) -> &str {
    &self.architecture
  }

  /// `TARS/<arch>`
  pub fn tars_dir(&self) -> PathBuf {
    self.work_dir.join("TARS").join(&self.architecture)
  }

  /// Directory holding the artifacts built with `hash`.
  pub fn store_dir(&self, hash: &str) -> PathBuf {
    self.tars_dir().join("store").join(short_prefix(hash)).join(hash)
  }

  pub fn tarball_name(&self, package: &str, version: &str, revision: Revision) -> String {
    format!("{package}-{version}-{revision}.{}.tar.gz", self.architecture)
  }

  /// Where the tarball of an assigned spec lives in the store.
  pub fn tarball_path(&self, spec: &PackageSpec) -> Result<PathBuf, StoreError> {
    let (hash, revision) = assigned(spec)?;
    Ok(self.store_dir(hash).join(self.tarball_name(&spec.package, &spec.version, revision)))
  }

  /// Directory of per-package links into the store.
  pub fn links_dir(&self, package: &str) -> PathBuf {
    self.tars_dir().join(package)
  }

  /// Relative target of a package link, as read back by artifact discovery.
  pub fn link_target(&self, hash: &str, tarball_name: &str) -> String {
    format!(
      "../../{}/store/{}/{}/{}",
      self.architecture,
      short_prefix(hash),
      hash,
      tarball_name
    )
  }

  /// `<arch>/<pkg>`
  pub fn package_dir(&self, package: &str) -> PathBuf {
    self.work_dir.join(&self.architecture).join(package)
  }

  /// Final install directory of an assigned spec.
  pub fn install_dir(&self, spec: &PackageSpec) -> Result<PathBuf, StoreError> {
    let (_, revision) = assigned(spec)?;
    Ok(self.package_dir(&spec.package).join(format!("{}-{}", spec.version, revision)))
  }

  /// `BUILD/<hash>`
  pub fn build_root(&self, hash: &str) -> PathBuf {
    self.work_dir.join("BUILD").join(hash)
  }

  /// `BUILD/<hash>/<pkg>`
  pub fn build_dir(&self, hash: &str, package: &str) -> PathBuf {
    self.build_root(hash).join(package)
  }

  /// `BUILD/<pkg>-latest[-<prefix>]`
  pub fn build_latest_link(&self, package: &str, devel_prefix: Option<&str>) -> PathBuf {
    let name = match devel_prefix {
      Some(prefix) => format!("{package}-latest-{prefix}"),
      None => format!("{package}-latest"),
    };
    self.work_dir.join("BUILD").join(name)
  }

  /// `INSTALLROOT/<hash>`
  pub fn install_root(&self, hash: &str) -> PathBuf {
    self.work_dir.join("INSTALLROOT").join(hash)
  }

  /// Directory holding the generated build script of an assigned spec.
  pub fn specs_dir(&self, spec: &PackageSpec) -> Result<PathBuf, StoreError> {
    let (_, revision) = assigned(spec)?;
    Ok(
      self
        .work_dir
        .join("SPECS")
        .join(&self.architecture)
        .join(&spec.package)
        .join(format!("{}-{}", spec.version, revision)),
    )
  }

  /// `SOURCES/<pkg>`
  pub fn source_dir(&self, package: &str) -> PathBuf {
    self.work_dir.join("SOURCES").join(package)
  }
}

/// The first two characters of a hash, used to fan out the store.
pub fn short_prefix(hash: &str) -> &str {
  hash.get(..2).unwrap_or(hash)
}
