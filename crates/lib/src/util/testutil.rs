//! Test utilities for kiln-lib.
//!
//! Helpers for laying out recipe repositories and work directories in
//! temporary directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary recipe repository.
pub struct RecipeDir {
  temp: TempDir,
}

impl RecipeDir {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Write a file relative to the repository root.
  pub fn write(&self, name: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Write `<name>.sh` with the given YAML header and build script.
  pub fn recipe(&self, name: &str, header: &str, body: &str) -> PathBuf {
    self.write(&format!("{name}.sh"), &format!("{header}\n---\n{body}"))
  }

  /// Write a `defaults-release.sh` with no overrides.
  pub fn default_defaults(&self) -> PathBuf {
    self.recipe("defaults-release", "package: defaults-release\nversion: v1", "")
  }
}

impl Default for RecipeDir {
  fn default() -> Self {
    Self::new()
  }
}
