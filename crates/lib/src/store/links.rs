//! Symlinks that publish a build, and cleanup of its scratch space.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Layout, StoreError, assigned, short_prefix};
use crate::spec::{PackageSpec, SpecArena};

/// Point `link` at `target`, replacing whatever was there.
#[cfg(unix)]
pub fn replace_symlink(target: impl AsRef<Path>, link: &Path) -> Result<(), StoreError> {
  if let Some(parent) = link.parent() {
    std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
  }
  match std::fs::remove_file(link) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(StoreError::io(link)(e)),
  }
  std::os::unix::fs::symlink(target.as_ref(), link).map_err(StoreError::io(link))
}

#[cfg(not(unix))]
pub fn replace_symlink(_target: impl AsRef<Path>, link: &Path) -> Result<(), StoreError> {
  Err(StoreError::io(link)(io::Error::new(
    io::ErrorKind::Unsupported,
    "symlinks are only supported on unix hosts",
  )))
}

/// Record the store tarball of an assigned spec in `TARS/<arch>/<pkg>/`.
pub fn link_tarball(layout: &Layout, spec: &PackageSpec) -> Result<PathBuf, StoreError> {
  let (hash, revision) = assigned(spec)?;
  let name = layout.tarball_name(&spec.package, &spec.version, revision);
  let link = layout.links_dir(&spec.package).join(&name);
  replace_symlink(layout.link_target(hash, &name), &link)?;
  Ok(link)
}

/// Which dependencies a dist directory links to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistKind {
  /// The recursive closure.
  Full,
  /// Direct requirements only.
  Direct,
  /// The recursive runtime closure.
  Runtime,
}

impl DistKind {
  pub const ALL: [DistKind; 3] = [DistKind::Full, DistKind::Direct, DistKind::Runtime];

  pub fn dir_name(self) -> &'static str {
    match self {
      DistKind::Full => "dist",
      DistKind::Direct => "dist-direct",
      DistKind::Runtime => "dist-runtime",
    }
  }

  fn members(self, spec: &PackageSpec) -> Vec<&str> {
    match self {
      DistKind::Full => spec.full_requires.iter().map(String::as_str).collect(),
      DistKind::Direct => spec.requires.iter().map(String::as_str).collect(),
      DistKind::Runtime => spec.full_runtime_requires.iter().map(String::as_str).collect(),
    }
  }
}

/// Recreate the dist directory of `kind` for `spec`.
pub fn create_dist_links(layout: &Layout, spec: &PackageSpec, specs: &SpecArena, kind: DistKind) -> Result<(), StoreError> {
  let (_, revision) = assigned(spec)?;
  let dir = layout
    .tars_dir()
    .join(kind.dir_name())
    .join(&spec.package)
    .join(format!("{}-{}-{}", spec.package, spec.version, revision));
  remove_dir_if_exists(&dir)?;
  std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;

  let members = std::iter::once(spec).chain(kind.members(spec).into_iter().filter_map(|name| specs.get(name)));
  for member in members {
    let Ok((hash, revision)) = assigned(member) else {
      debug!(package = %member.package, "skipping dist link to a package without a build");
      continue;
    };
    let name = layout.tarball_name(&member.package, &member.version, revision);
    let target = format!(
      "../../../../../TARS/{}/store/{}/{}/{}",
      layout.architecture(),
      short_prefix(hash),
      hash,
      name
    );
    replace_symlink(target, &dir.join(&name))?;
  }
  Ok(())
}

/// Publish an installed build: devel build links, `latest` links and every
/// dist directory.
pub fn publish(layout: &Layout, spec: &PackageSpec, specs: &SpecArena) -> Result<(), StoreError> {
  let (hash, revision) = assigned(spec)?;
  let version_revision = format!("{}-{}", spec.version, revision);

  if spec.is_devel_pkg {
    debug!(package = %spec.package, "linking development build directory");
    replace_symlink(hash, &layout.build_latest_link(&spec.package, None))?;
    if let Some(prefix) = spec.devel_prefix.as_deref().filter(|p| !p.is_empty()) {
      replace_symlink(hash, &layout.build_latest_link(&spec.package, Some(prefix)))?;
    }
  }

  let package_dir = layout.package_dir(&spec.package);
  replace_symlink(&version_revision, &package_dir.join("latest"))?;
  if !spec.build_family.is_empty() {
    replace_symlink(&version_revision, &package_dir.join(format!("latest-{}", spec.build_family)))?;
  }

  for kind in DistKind::ALL {
    create_dist_links(layout, spec, specs, kind)?;
  }
  Ok(())
}

/// Remove the scratch space of a finished build.
///
/// Failures are logged rather than returned; a leftover directory only
/// costs disk space.
pub fn cleanup_after_build(layout: &Layout, spec: &PackageSpec, aggressive: bool) {
  if let Some(obsolete) = &spec.obsolete_tarball {
    if let Ok(real) = std::fs::canonicalize(obsolete) {
      ignore_missing(std::fs::remove_file(&real), &real);
    }
    ignore_missing(std::fs::remove_file(obsolete), obsolete);
  }

  let Some(hash) = spec.hash.as_deref() else { return };
  let mut dirs = vec![layout.build_root(hash), layout.install_root(hash)];
  if aggressive {
    dirs.push(layout.source_dir(&spec.package));
  }
  for dir in &dirs {
    debug!(path = %dir.display(), "cleaning up");
    ignore_missing(std::fs::remove_dir_all(dir), dir);
  }

  ignore_missing(
    std::fs::remove_file(layout.build_latest_link(&spec.package, None)),
    &layout.build_latest_link(&spec.package, None),
  );
  if let Some(prefix) = spec.devel_prefix.as_deref().filter(|p| !p.is_empty()) {
    let link = layout.build_latest_link(&spec.package, Some(prefix));
    ignore_missing(std::fs::remove_file(&link), &link);
  }
  // Only succeeds when nothing else is left in them.
  let _ = std::fs::remove_dir(layout.work_dir().join("BUILD"));
  let _ = std::fs::remove_dir(layout.work_dir().join("INSTALLROOT"));
}

pub(crate) fn remove_dir_if_exists(dir: &Path) -> Result<(), StoreError> {
  match std::fs::remove_dir_all(dir) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(StoreError::io(dir)(e)),
  }
}

fn ignore_missing(result: io::Result<()>, path: &Path) {
  match result {
    Err(e) if e.kind() != io::ErrorKind::NotFound => {
      warn!(path = %path.display(), error = %e, "cleanup failed");
    }
    _ => {}
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::spec::Revision;

  fn spec(name: &str, hash: &str, requires: &[&str]) -> PackageSpec {
    PackageSpec {
      package: name.to_string(),
      version: "v1".to_string(),
      hash: Some(hash.to_string()),
      revision: Some(Revision::remote(1)),
      requires: requires.iter().map(|s| s.to_string()).collect(),
      full_requires: requires.iter().map(|s| s.to_string()).collect(),
      build_family: "release".to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn tarball_link_points_into_store() {
    let temp = tempfile::tempdir().unwrap();
    let layout = Layout::new(temp.path(), "osx_arm64");
    let zlib = spec("zlib", "ab12", &[]);
    let link = link_tarball(&layout, &zlib).unwrap();
    assert_eq!(
      std::fs::read_link(&link).unwrap(),
      PathBuf::from("../../osx_arm64/store/ab/ab12/zlib-v1-1.osx_arm64.tar.gz")
    );
  }

  #[test]
  fn publish_creates_latest_and_dist_links() {
    let temp = tempfile::tempdir().unwrap();
    let layout = Layout::new(temp.path(), "osx_arm64");
    let mut specs = SpecArena::new();
    specs.insert(spec("zlib", "ab12", &[]));
    specs.insert(spec("root", "cd34", &["zlib"]));

    publish(&layout, specs.get("root").unwrap(), &specs).unwrap();

    let package_dir = layout.package_dir("root");
    assert_eq!(std::fs::read_link(package_dir.join("latest")).unwrap(), PathBuf::from("v1-1"));
    assert_eq!(
      std::fs::read_link(package_dir.join("latest-release")).unwrap(),
      PathBuf::from("v1-1")
    );

    let dist = layout.tars_dir().join("dist").join("root").join("root-v1-1");
    let mut names: Vec<_> = std::fs::read_dir(&dist)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    assert_eq!(names, vec!["root-v1-1.osx_arm64.tar.gz", "zlib-v1-1.osx_arm64.tar.gz"]);
    assert_eq!(
      std::fs::read_link(dist.join("zlib-v1-1.osx_arm64.tar.gz")).unwrap(),
      PathBuf::from("../../../../../TARS/osx_arm64/store/ab/ab12/zlib-v1-1.osx_arm64.tar.gz")
    );

    let runtime = layout.tars_dir().join("dist-runtime").join("root").join("root-v1-1");
    assert_eq!(std::fs::read_dir(runtime).unwrap().count(), 1);
  }

  #[test]
  fn cleanup_removes_scratch_dirs() {
    let temp = tempfile::tempdir().unwrap();
    let layout = Layout::new(temp.path(), "osx_arm64");
    let zlib = spec("zlib", "ab12", &[]);
    std::fs::create_dir_all(layout.build_dir("ab12", "zlib")).unwrap();
    std::fs::create_dir_all(layout.install_root("ab12")).unwrap();
    std::fs::create_dir_all(layout.source_dir("zlib")).unwrap();

    cleanup_after_build(&layout, &zlib, false);
    assert!(!layout.build_root("ab12").exists());
    assert!(!temp.path().join("INSTALLROOT").exists());
    assert!(layout.source_dir("zlib").exists());

    cleanup_after_build(&layout, &zlib, true);
    assert!(!layout.source_dir("zlib").exists());
  }
}
