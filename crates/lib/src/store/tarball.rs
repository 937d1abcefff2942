//! Packing install trees into store tarballs and unpacking them again.
//!
//! Tarball entries are rooted at `<arch>/<pkg>/<ver>-<rev>/`, so unpacking
//! into the work directory recreates the install tree in place.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder};
use tracing::debug;

use super::StoreError;

/// Write `source` as a gzipped tarball at `output`, with every entry under `prefix`.
///
/// The archive is written to a temporary name first and renamed into place,
/// so a tarball in the store is always complete.
pub fn create(source: &Path, prefix: &str, output: &Path) -> Result<(), StoreError> {
  let parent = output.parent().unwrap_or(Path::new("."));
  std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;

  let partial = output.with_extension("partial");
  let file = File::create(&partial).map_err(StoreError::io(&partial))?;
  let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
  let mut builder = Builder::new(encoder);
  builder.follow_symlinks(false);
  builder.append_dir_all(prefix, source).map_err(StoreError::io(source))?;

  let encoder = builder.into_inner().map_err(StoreError::io(&partial))?;
  encoder.finish().map_err(StoreError::io(&partial))?;
  std::fs::rename(&partial, output).map_err(StoreError::io(output))?;

  debug!(tarball = %output.display(), "created tarball");
  Ok(())
}

/// Unpack a tarball created by [`create`] below `dest`.
pub fn unpack(tarball: &Path, dest: &Path) -> Result<(), StoreError> {
  let file = File::open(tarball).map_err(StoreError::io(tarball))?;
  let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
  archive.set_preserve_permissions(true);
  archive.unpack(dest).map_err(StoreError::io(dest))?;

  debug!(tarball = %tarball.display(), dest = %dest.display(), "unpacked tarball");
  Ok(())
}
