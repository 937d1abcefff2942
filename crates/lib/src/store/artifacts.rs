//! Discovering existing builds and choosing revisions.
//!
//! Every build is recorded as a link in `TARS/<arch>/<pkg>/` pointing into
//! the hash-addressed store. Reading those links back yields the revisions
//! already taken and the hashes they were built with.

use std::collections::BTreeSet;
use std::path::PathBuf;

use regex::Regex;
use tracing::{debug, warn};

use super::{Layout, StoreError};
use crate::spec::{Revision, SpecHashes};

/// An existing build of a package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub revision: Revision,
  pub hash: String,
  /// The link in `TARS/<arch>/<pkg>/` that recorded it.
  pub link: PathBuf,
}

/// Read every build of `package` at `version` recorded in the links directory.
///
/// A missing directory means nothing was built yet. Links whose target
/// cannot be parsed are skipped with a warning.
pub fn discover(layout: &Layout, package: &str, version: &str) -> Result<Vec<Artifact>, StoreError> {
  let arch = regex::escape(layout.architecture());
  let pkg = regex::escape(package);
  let ver = regex::escape(version);
  let name_re = compile(package, &format!(r"^{pkg}-{ver}-(?:local)?[0-9]+\.{arch}\.tar\.gz$"))?;
  let target_re = compile(
    package,
    &format!(r"^\.\./\.\./{arch}/store/[0-9a-f]{{2}}/([0-9a-f]+)/{pkg}-{ver}-((?:local)?[0-9]+)\.{arch}\.tar\.gz$"),
  )?;

  let dir = layout.links_dir(package);
  let entries = match std::fs::read_dir(&dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(StoreError::io(&dir)(e)),
  };

  let mut artifacts = Vec::new();
  for entry in entries {
    let entry = entry.map_err(StoreError::io(&dir))?;
    let name = entry.file_name();
    let Some(name) = name.to_str() else { continue };
    if !name_re.is_match(name) {
      continue;
    }

    let link = entry.path();
    let target = match std::fs::read_link(&link) {
      Ok(target) => target.to_string_lossy().into_owned(),
      Err(e) => {
        warn!(link = %link.display(), error = %e, "package link could not be read");
        continue;
      }
    };
    let Some(caps) = target_re.captures(&target) else {
      warn!(link = %link.display(), target = %target, "package link could not be parsed");
      continue;
    };
    let Ok(revision) = caps[2].parse::<Revision>() else {
      warn!(link = %link.display(), target = %target, "package link has an invalid revision");
      continue;
    };

    artifacts.push(Artifact {
      revision,
      hash: caps[1].to_string(),
      link,
    });
  }

  artifacts.sort_by(|a, b| a.link.cmp(&b.link));
  debug!(package = %package, version = %version, found = artifacts.len(), "discovered existing builds");
  Ok(artifacts)
}

fn compile(package: &str, pattern: &str) -> Result<Regex, StoreError> {
  Regex::new(pattern).map_err(|e| StoreError::Pattern {
    package: package.to_string(),
    message: e.to_string(),
  })
}

/// Pick the existing build to reuse, if any.
///
/// A local revision is a candidate when its hash is one of the local hashes,
/// a remote revision when its hash is one of the remote hashes. Local
/// revisions are never reused when results will be published, so nothing
/// published can depend on them. Remote candidates win over local ones, then
/// the hash that appears earlier in its list.
pub fn select<'a>(artifacts: &'a [Artifact], hashes: &SpecHashes, writable: bool) -> Option<&'a Artifact> {
  artifacts
    .iter()
    .filter_map(|artifact| {
      let list = if artifact.revision.local {
        if writable {
          debug!(revision = %artifact.revision, "skipping local revision because results will be published");
          return None;
        }
        &hashes.local_hashes
      } else {
        &hashes.remote_hashes
      };
      let rank = list.iter().position(|h| *h == artifact.hash)?;
      Some(((artifact.revision.local, rank), artifact))
    })
    .min_by_key(|(key, _)| *key)
    .map(|(_, artifact)| artifact)
}

/// The smallest positive revision number not taken by a revision of the
/// same kind.
pub fn next_revision(artifacts: &[Artifact], local: bool) -> Revision {
  let busy: BTreeSet<u32> = artifacts
    .iter()
    .filter(|a| a.revision.local == local)
    .map(|a| a.revision.number)
    .collect();
  let number = (1..).find(|n| !busy.contains(n)).unwrap_or(1);
  Revision { local, number }
}
