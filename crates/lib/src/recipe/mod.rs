//! Recipes: a YAML header describing a package and an opaque build script.

pub mod parse;
pub mod store;
mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use parse::{Recipe, has_commands, parse_recipe};
pub use store::{RecipeStore, RecipeText, Taps};
pub use types::{Metadata, OrderedMap, StringOrList};

/// Errors that can occur while reading or parsing a recipe.
#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("unable to parse {file}: header missing")]
  HeaderMissing { file: String },

  #[error("malformed header for {file}: empty recipe")]
  EmptyRecipe { file: String },

  #[error("malformed header for {file}: {message}")]
  Yaml { file: String, message: String },

  #[error("malformed header for {file}: not a YAML key / value")]
  NotMapping { file: String },

  #[error("malformed header for {file}: missing package field in header")]
  MissingPackage { file: String },

  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read {file} at {git_ref}: {message}")]
  Tap { file: String, git_ref: String, message: String },
}
