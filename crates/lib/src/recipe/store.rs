//! Locating and reading recipe files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::RecipeError;
use crate::scm::Scm;

/// Alternative recipe locations, keyed by lower-cased package name.
///
/// A value `dist:<Name>@<ref>` reads the recipe from `<ref>` of the recipe
/// repository; any other value is a path to a recipe file.
pub type Taps = BTreeMap<String, String>;

/// Prefix of tap values that point into the history of the recipe repository.
pub const DIST_TAP_PREFIX: &str = "dist:";

/// The raw text of a recipe together with a label for error messages.
#[derive(Debug, Clone)]
pub struct RecipeText {
  pub file: String,
  pub text: String,
}

/// A directory of `<name>.sh` recipes.
pub struct RecipeStore<'a> {
  root: PathBuf,
  scm: &'a dyn Scm,
}

impl<'a> RecipeStore<'a> {
  pub fn new(root: impl Into<PathBuf>, scm: &'a dyn Scm) -> Self {
    Self { root: root.into(), scm }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Read the recipe stored under `name` (already lower-cased).
  pub fn read(&self, name: &str, taps: &Taps) -> Result<RecipeText, RecipeError> {
    match taps.get(name) {
      Some(tap) => self.read_tap(name, tap),
      None => self.read_file(&self.root.join(format!("{name}.sh"))),
    }
  }

  /// Names of every `defaults-*.sh` file in the store, sorted.
  pub fn available_defaults(&self) -> Vec<String> {
    let Ok(entries) = fs::read_dir(&self.root) else {
      return Vec::new();
    };
    let mut names: Vec<String> = entries
      .filter_map(|e| e.ok())
      .filter_map(|e| e.file_name().to_str().map(str::to_string))
      .filter_map(|n| n.strip_prefix("defaults-")?.strip_suffix(".sh").map(str::to_string))
      .collect();
    names.sort();
    names
  }

  fn read_tap(&self, name: &str, tap: &str) -> Result<RecipeText, RecipeError> {
    if let Some(spec) = tap.strip_prefix(DIST_TAP_PREFIX) {
      let git_ref = spec.split_once('@').map(|(_, r)| r).unwrap_or("HEAD");
      let file = format!("{name}.sh");
      debug!(package = %name, git_ref = %git_ref, "reading recipe from recipe repository history");
      let text = self
        .scm
        .read_file_at_ref(&self.root, git_ref, &file)
        .map_err(|e| RecipeError::Tap {
          file: file.clone(),
          git_ref: git_ref.to_string(),
          message: e.to_string(),
        })?;
      return Ok(RecipeText {
        file: format!("{file}@{git_ref}"),
        text,
      });
    }

    let path = Path::new(tap);
    let path = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
    self.read_file(&path)
  }

  fn read_file(&self, path: &Path) -> Result<RecipeText, RecipeError> {
    let text = fs::read_to_string(path).map_err(|source| RecipeError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(RecipeText {
      file: path.display().to_string(),
      text,
    })
  }
}
