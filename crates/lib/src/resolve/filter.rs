//! Conditional requirement entries.
//!
//! A requirement may be written `name:condition`. The condition is either
//! `defaults=<regex>`, matched against the selected defaults, or a regex
//! matched against the start of the architecture.

use fancy_regex::Regex;

use super::ResolveError;

/// Compile `pattern` so that it only has to match at the start of the input.
///
/// Look-around is allowed: `(?!osx)` is the usual way to exclude a platform.
fn prefix_regex(package: &str, field: &str, pattern: &str) -> Result<Regex, ResolveError> {
  Regex::new(&format!("^(?:{pattern})")).map_err(|e| malformed(package, field, pattern, e))
}

/// Whether `pattern` matches the start of `input`.
pub(crate) fn prefix_match(package: &str, field: &str, pattern: &str, input: &str) -> Result<bool, ResolveError> {
  prefix_regex(package, field, pattern)?
    .is_match(input)
    .map_err(|e| malformed(package, field, pattern, e))
}

fn malformed(package: &str, field: &str, pattern: &str, error: fancy_regex::Error) -> ResolveError {
  ResolveError::MalformedRegex {
    package: package.to_string(),
    field: field.to_string(),
    pattern: pattern.to_string(),
    message: error.to_string(),
  }
}

/// Split requirement entries into the names that apply and those disabled
/// by their condition.
pub fn filter_requirements(
  package: &str,
  entries: &[String],
  architecture: &str,
  defaults: &str,
) -> Result<(Vec<String>, Vec<String>), ResolveError> {
  let mut kept = Vec::new();
  let mut disabled = Vec::new();

  for entry in entries {
    let Some((name, condition)) = entry.split_once(':') else {
      kept.push(entry.clone());
      continue;
    };

    let matches = match condition.strip_prefix("defaults=") {
      Some(pattern) => prefix_match(package, "requires", pattern, defaults)?,
      None => prefix_match(package, "requires", condition, architecture)?,
    };

    if matches {
      kept.push(name.to_string());
    } else {
      disabled.push(name.to_string());
    }
  }

  Ok((kept, disabled))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entries(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn plain_entries_are_kept() {
    let (kept, disabled) = filter_requirements("x", &entries(&["zlib", "ROOT"]), "slc9_x86-64", "release").unwrap();
    assert_eq!(kept, vec!["zlib", "ROOT"]);
    assert!(disabled.is_empty());
  }

  #[test]
  fn architecture_condition_is_prefix_matched() {
    let list = entries(&["libcxx:osx", "curl:slc", "bz2:.*_x86-64"]);
    let (kept, disabled) = filter_requirements("x", &list, "slc9_x86-64", "release").unwrap();
    assert_eq!(kept, vec!["curl", "bz2"]);
    assert_eq!(disabled, vec!["libcxx"]);
  }

  #[test]
  fn defaults_condition_matches_defaults_name() {
    let list = entries(&["O2sim:defaults=o2.*", "Ninja:defaults=release"]);
    let (kept, disabled) = filter_requirements("x", &list, "slc9_x86-64", "o2-dataflow").unwrap();
    assert_eq!(kept, vec!["O2sim"]);
    assert_eq!(disabled, vec!["Ninja"]);
  }

  #[test]
  fn negative_lookahead_excludes_a_platform() {
    let list = entries(&["AliRoot:(?!osx)", "GCC"]);

    let (kept, disabled) = filter_requirements("root", &list, "osx_x86-64", "release").unwrap();
    assert_eq!(kept, vec!["GCC"]);
    assert_eq!(disabled, vec!["AliRoot"]);

    let (kept, disabled) = filter_requirements("root", &list, "slc7_x86-64", "release").unwrap();
    assert_eq!(kept, vec!["AliRoot", "GCC"]);
    assert!(disabled.is_empty());
  }

  #[test]
  fn lookahead_in_defaults_condition() {
    let list = entries(&["Ninja:defaults=(?!o2)"]);
    let (kept, _) = filter_requirements("x", &list, "slc9_x86-64", "release").unwrap();
    assert_eq!(kept, vec!["Ninja"]);
    let (kept, disabled) = filter_requirements("x", &list, "slc9_x86-64", "o2").unwrap();
    assert!(kept.is_empty());
    assert_eq!(disabled, vec!["Ninja"]);
  }

  #[test]
  fn malformed_condition_names_the_package() {
    let err = filter_requirements("ROOT", &entries(&["zlib:("]), "slc9_x86-64", "release").unwrap_err();
    assert!(err.to_string().contains("ROOT"));
  }
}
