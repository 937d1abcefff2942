use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{RemoteSync, SyncError};
use crate::spec::PackageSpec;
use crate::store::links::replace_symlink;
use crate::store::{Layout, assigned, short_prefix};

/// A remote store that is a directory on a mounted filesystem.
#[derive(Debug, Clone)]
pub struct DirRemoteSync {
  root: PathBuf,
  writable: bool,
}

impl DirRemoteSync {
  pub fn new(root: impl Into<PathBuf>, writable: bool) -> Self {
    Self {
      root: root.into(),
      writable,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn store_dir(&self, layout: &Layout, hash: &str) -> PathBuf {
    self
      .root
      .join(layout.architecture())
      .join("store")
      .join(short_prefix(hash))
      .join(hash)
  }

  fn links_dir(&self, layout: &Layout, package: &str) -> PathBuf {
    self.root.join(layout.architecture()).join(package)
  }
}

impl RemoteSync for DirRemoteSync {
  fn is_writable(&self) -> bool {
    self.writable
  }

  fn sync_to_local(&self, layout: &Layout, spec: &PackageSpec) -> Result<(), SyncError> {
    let Some(hashes) = &spec.hashes else {
      return Ok(());
    };

    for hash in &hashes.remote_hashes {
      let remote = self.store_dir(layout, hash);
      if !remote.is_dir() {
        continue;
      }
      let copied = copy_missing_files(&remote, &layout.store_dir(hash))?;
      if copied > 0 {
        info!(package = %spec.package, hash = %hash, copied, "fetched artifacts from remote store");
      }
    }

    let remote_links = self.links_dir(layout, &spec.package);
    let entries = match std::fs::read_dir(&remote_links) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(io_error(&remote_links, e)),
    };
    let prefix = format!("{}-{}-", spec.package, spec.version);
    let local_links = layout.links_dir(&spec.package);
    for entry in entries {
      let entry = entry.map_err(|e| io_error(&remote_links, e))?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      if !name.starts_with(&prefix) || local_links.join(name).symlink_metadata().is_ok() {
        continue;
      }
      let target = std::fs::read_link(entry.path()).map_err(|e| io_error(&entry.path(), e))?;
      debug!(package = %spec.package, link = %name, "fetched package link");
      replace_symlink(target, &local_links.join(name))?;
    }
    Ok(())
  }

  fn sync_to_remote(&self, layout: &Layout, spec: &PackageSpec) -> Result<(), SyncError> {
    if !self.writable {
      return Ok(());
    }
    let (hash, revision) = assigned(spec)?;
    let name = layout.tarball_name(&spec.package, &spec.version, revision);
    let local = layout.store_dir(hash).join(&name);
    let remote_dir = self.store_dir(layout, hash);
    std::fs::create_dir_all(&remote_dir).map_err(|e| io_error(&remote_dir, e))?;
    let remote = remote_dir.join(&name);
    std::fs::copy(&local, &remote).map_err(|e| io_error(&local, e))?;

    replace_symlink(
      layout.link_target(hash, &name),
      &self.links_dir(layout, &spec.package).join(&name),
    )?;
    info!(package = %spec.package, revision = %revision, "uploaded artifact to remote store");
    Ok(())
  }
}

/// Copy regular files of `from` missing in `to`. Returns how many were copied.
fn copy_missing_files(from: &Path, to: &Path) -> Result<usize, SyncError> {
  std::fs::create_dir_all(to).map_err(|e| io_error(to, e))?;
  let mut copied = 0;
  for entry in std::fs::read_dir(from).map_err(|e| io_error(from, e))? {
    let entry = entry.map_err(|e| io_error(from, e))?;
    let dest = to.join(entry.file_name());
    if dest.exists() || !entry.path().is_file() {
      continue;
    }
    std::fs::copy(entry.path(), &dest).map_err(|e| io_error(&dest, e))?;
    copied += 1;
  }
  Ok(copied)
}

fn io_error(path: &Path, source: io::Error) -> SyncError {
  SyncError::Io {
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::spec::{Revision, SpecHashes};

  fn spec(hash: &str) -> PackageSpec {
    PackageSpec {
      package: "zlib".to_string(),
      version: "v1".to_string(),
      hash: Some(hash.to_string()),
      revision: Some(Revision::remote(1)),
      hashes: Some(SpecHashes {
        remote_hashes: vec![hash.to_string()],
        ..Default::default()
      }),
      ..Default::default()
    }
  }

  #[test]
  fn upload_then_fetch_into_fresh_work_dir() {
    let remote = tempfile::tempdir().unwrap();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let zlib = spec("ab12");

    let layout = Layout::new(first.path(), "slc7_x86-64");
    let tarball = layout.tarball_path(&zlib).unwrap();
    std::fs::create_dir_all(tarball.parent().unwrap()).unwrap();
    std::fs::write(&tarball, "tarball").unwrap();

    let sync = DirRemoteSync::new(remote.path(), true);
    sync.sync_to_remote(&layout, &zlib).unwrap();

    let fresh = Layout::new(second.path(), "slc7_x86-64");
    sync.sync_to_local(&fresh, &zlib).unwrap();

    assert_eq!(
      std::fs::read_to_string(fresh.tarball_path(&zlib).unwrap()).unwrap(),
      "tarball"
    );
    let link = fresh.links_dir("zlib").join("zlib-v1-1.slc7_x86-64.tar.gz");
    assert_eq!(
      std::fs::read_link(link).unwrap(),
      PathBuf::from("../../slc7_x86-64/store/ab/ab12/zlib-v1-1.slc7_x86-64.tar.gz")
    );
  }

  #[test]
  fn read_only_store_does_not_upload() {
    let remote = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let layout = Layout::new(work.path(), "slc7_x86-64");
    DirRemoteSync::new(remote.path(), false)
      .sync_to_remote(&layout, &spec("ab12"))
      .unwrap();
    assert_eq!(std::fs::read_dir(remote.path()).unwrap().count(), 0);
  }

  #[test]
  fn fetch_with_nothing_remote_is_fine() {
    let remote = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let layout = Layout::new(work.path(), "slc7_x86-64");
    DirRemoteSync::new(remote.path(), false)
      .sync_to_local(&layout, &spec("ab12"))
      .unwrap();
  }
}
