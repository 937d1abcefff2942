//! Default locations, overridable through the environment.

use std::path::PathBuf;

pub const WORK_DIR_ENV: &str = "KILN_WORK_DIR";
pub const CONFIG_DIR_ENV: &str = "KILN_CONFIG_DIR";
pub const REMOTE_STORE_ENV: &str = "KILN_REMOTE_STORE";

/// Directory holding sources, build trees, install trees and tarballs.
pub fn work_dir() -> PathBuf {
  std::env::var(WORK_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("sw"))
}

/// Directory holding the recipes.
pub fn config_dir() -> PathBuf {
  std::env::var(CONFIG_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("recipes"))
}

/// Remote store location, if one is configured.
pub fn remote_store() -> Option<String> {
  std::env::var(REMOTE_STORE_ENV).ok().filter(|s| !s.is_empty())
}
