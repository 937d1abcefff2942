//! Exchanging artifacts with a shared remote store.
//!
//! A remote store holds the same `<arch>/store/` and `<arch>/<pkg>/` trees
//! as the local `TARS/` directory. Fetching is best effort: a store that
//! cannot be reached only means more packages are built locally.

mod dir;

pub use dir::DirRemoteSync;

use std::path::PathBuf;

use thiserror::Error;

use crate::spec::PackageSpec;
use crate::store::{Layout, StoreError};

/// Suffix on a store location that allows uploads.
pub const WRITABLE_SUFFIX: &str = "::rw";

const UNSUPPORTED_SCHEMES: [&str; 6] = ["http://", "https://", "s3://", "b3://", "ssh://", "rsync://"];

/// Errors that can occur while syncing with a remote store.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("remote store {url} uses an unsupported transport; only local directories are supported")]
  Unsupported { url: String },

  #[error("remote store {path} is not a directory")]
  NotADirectory { path: PathBuf },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Transfers artifacts between the work directory and a remote store.
pub trait RemoteSync {
  /// Whether built artifacts are uploaded.
  fn is_writable(&self) -> bool;

  /// Fetch every artifact matching one of `spec`'s remote hashes, and the
  /// package links that name them.
  fn sync_to_local(&self, layout: &Layout, spec: &PackageSpec) -> Result<(), SyncError>;

  /// Upload the tarball and package link of an assigned spec.
  fn sync_to_remote(&self, layout: &Layout, spec: &PackageSpec) -> Result<(), SyncError>;
}

/// Used when no remote store is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteSync;

impl RemoteSync for NoRemoteSync {
  fn is_writable(&self) -> bool {
    false
  }

  fn sync_to_local(&self, _layout: &Layout, _spec: &PackageSpec) -> Result<(), SyncError> {
    Ok(())
  }

  fn sync_to_remote(&self, _layout: &Layout, _spec: &PackageSpec) -> Result<(), SyncError> {
    Ok(())
  }
}

/// Pick the sync backend for a store location. `None` or an empty string
/// means no remote store; a trailing `::rw` makes the store writable.
pub fn remote_from_url(url: Option<&str>) -> Result<Box<dyn RemoteSync>, SyncError> {
  let Some(url) = url.filter(|u| !u.is_empty()) else {
    return Ok(Box::new(NoRemoteSync));
  };

  let (location, writable) = match url.strip_suffix(WRITABLE_SUFFIX) {
    Some(location) => (location, true),
    None => (url, false),
  };
  if UNSUPPORTED_SCHEMES.iter().any(|scheme| location.starts_with(scheme)) {
    return Err(SyncError::Unsupported { url: url.to_string() });
  }

  let root = PathBuf::from(location);
  if root.exists() && !root.is_dir() {
    return Err(SyncError::NotADirectory { path: root });
  }
  Ok(Box::new(DirRemoteSync::new(root, writable)))
}
