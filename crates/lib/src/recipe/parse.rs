//! Splitting a recipe document into its YAML header and build script.

use super::{Metadata, RecipeError};

/// A parsed recipe: header plus the opaque build-script body.
#[derive(Debug, Clone)]
pub struct Recipe {
  pub metadata: Metadata,
  pub body: String,
}

/// Parse the text of a recipe file.
///
/// The document is split at the first line consisting of exactly `---`.
/// Everything before it must be a YAML mapping with a `package` key;
/// everything after it is the build script, kept verbatim.
pub fn parse_recipe(file: &str, text: &str) -> Result<Recipe, RecipeError> {
  let (header, body) = split_header(text).ok_or_else(|| RecipeError::HeaderMissing { file: file.to_string() })?;

  if header.trim().is_empty() {
    return Err(RecipeError::EmptyRecipe { file: file.to_string() });
  }

  let value: serde_yaml::Value = serde_yaml::from_str(header).map_err(|e| RecipeError::Yaml {
    file: file.to_string(),
    message: e.to_string(),
  })?;

  let mapping = match &value {
    serde_yaml::Value::Mapping(m) => m,
    serde_yaml::Value::Null => return Err(RecipeError::EmptyRecipe { file: file.to_string() }),
    _ => return Err(RecipeError::NotMapping { file: file.to_string() }),
  };

  if !mapping.contains_key("package") {
    return Err(RecipeError::MissingPackage { file: file.to_string() });
  }

  let metadata: Metadata = serde_yaml::from_value(value).map_err(|e| RecipeError::Yaml {
    file: file.to_string(),
    message: e.to_string(),
  })?;

  Ok(Recipe {
    metadata,
    body: body.to_string(),
  })
}

fn split_header(text: &str) -> Option<(&str, &str)> {
  let mut offset = 0;
  for line in text.split_inclusive('\n') {
    if line.trim_end_matches(['\n', '\r']) == "---" {
      return Some((&text[..offset], &text[offset + line.len()..]));
    }
    offset += line.len();
  }
  None
}

/// Whether a build-script body has anything besides comments and blank lines.
pub fn has_commands(body: &str) -> bool {
  body
    .lines()
    .map(str::trim)
    .any(|line| !line.is_empty() && !line.starts_with('#'))
}
