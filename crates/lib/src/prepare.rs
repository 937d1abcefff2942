//! Filling in source-control state before hashing.
//!
//! Preparation runs once over the ordered specs. It resolves each package's
//! tag to a commit, detects packages checked out for development, expands
//! version templates and computes the recursive dependency closures.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::SHORT_HASH_LEN;
use crate::scm::{Scm, ScmError};
use crate::spec::SpecArena;
use crate::util::hash::Hasher;

/// Errors that can occur while preparing specs.
#[derive(Debug, Error)]
pub enum PrepareError {
  #[error("source control query for {package} failed: {source}")]
  Scm {
    package: String,
    #[source]
    source: ScmError,
  },

  #[error("the following development packages have the wrong spelling: {}", .packages.join(", "))]
  WrongSpelling { packages: Vec<String> },

  #[error("{package} is checked out for development but its recipe has no source")]
  DevelWithoutSource { package: String },

  #[error("failed to scan {path} for development packages: {source}")]
  Scan {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Inputs to [`prepare`].
#[derive(Debug, Clone)]
pub struct PrepareOptions {
  /// The recipe repository; its branch feeds `%(branch_basename)s`.
  pub config_dir: PathBuf,
  /// Directory scanned for development checkouts named after packages.
  pub devel_root: PathBuf,
  pub defaults: String,
  pub devel_prefix: Option<String>,
  /// Packages never treated as development checkouts.
  pub no_local: Vec<String>,
  /// Ignore development checkouts altogether.
  pub force_tracked: bool,
  /// Time used for the date placeholders.
  pub now: NaiveDateTime,
}

impl PrepareOptions {
  pub fn new(config_dir: impl Into<PathBuf>, devel_root: impl Into<PathBuf>, defaults: impl Into<String>) -> Self {
    Self {
      config_dir: config_dir.into(),
      devel_root: devel_root.into(),
      defaults: defaults.into(),
      devel_prefix: None,
      no_local: Vec::new(),
      force_tracked: false,
      now: chrono::Local::now().naive_local(),
    }
  }
}

/// Prepare every spec in `order`.
pub fn prepare(specs: &mut SpecArena, order: &[String], scm: &dyn Scm, opts: &PrepareOptions) -> Result<(), PrepareError> {
  let (branch_basename, branch_stream) = recipe_branch(scm, &opts.config_dir);
  let devel = find_devel_packages(order, opts)?;

  for name in order {
    let Some(spec) = specs.get_mut(name) else { continue };

    spec.is_devel_pkg = devel.contains(name);
    if spec.is_devel_pkg {
      if spec.source.is_none() {
        return Err(PrepareError::DevelWithoutSource { package: name.clone() });
      }
      spec.source = Some(opts.devel_root.join(name).display().to_string());
    }

    spec.tag = expand_date(&spec.tag, &opts.now);

    if let Some(source) = spec.source.clone() {
      let scm_err = |source| PrepareError::Scm {
        package: name.clone(),
        source,
      };
      spec.scm_refs = scm.resolve_refs(&source).map_err(scm_err)?;

      if spec.is_devel_pkg {
        let dir = Path::new(&source);
        let commit = scm.checked_out_commit(dir).map_err(scm_err)?;
        let changes = scm.local_changes(dir).map_err(scm_err)?;
        if !changes.is_clean() {
          debug!(package = %name, untracked = changes.untracked, "development checkout has local changes");
        }
        let mut local = Hasher::new();
        local.update(&changes.diff);
        if changes.untracked {
          warn!(package = %name, "untracked files in development checkout, forcing a rebuild");
          local.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string());
        }
        spec.devel_hash = Some(format!("{}{}", commit, local.hexdigest()));
        spec.tag = match &opts.devel_prefix {
          Some(prefix) => prefix.clone(),
          None => branch_prefix(&scm.branch_or_ref(dir).map_err(scm_err)?),
        };
        spec.commit_hash = "0".to_string();
        info!(package = %name, tag = %spec.tag, "using development checkout");
      } else {
        spec.commit_hash = spec
          .scm_refs
          .get(&format!("refs/heads/{}", spec.tag))
          .cloned()
          .unwrap_or_else(|| spec.tag.clone());
      }
    } else {
      spec.commit_hash = "0".to_string();
    }

    spec.version = resolve_version(
      &spec.version,
      &VersionContext {
        commit_hash: &spec.commit_hash,
        tag: &spec.tag,
        defaults: &opts.defaults,
        branch_basename: &branch_basename,
        branch_stream: &branch_stream,
        now: &opts.now,
      },
    );
    // Without -z the prefix is the checked out branch.
    let prefix = match &opts.devel_prefix {
      Some(prefix) => prefix.clone(),
      None if spec.is_devel_pkg => spec.tag.clone(),
      None => spec.source.as_deref().map(|s| checkout_branch(scm, s)).unwrap_or_default(),
    };
    if spec.is_devel_pkg {
      spec.devel_prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
      if let Some(devel_prefix) = &opts.devel_prefix {
        spec.version = devel_prefix.clone();
      }
    }
    spec.build_family = if prefix.is_empty() {
      opts.defaults.clone()
    } else {
      format!("{}-{}", prefix, opts.defaults)
    };

    debug!(package = %name, version = %spec.version, commit = %spec.commit_hash, "prepared");
  }

  compute_closures(specs, order);
  Ok(())
}

/// A branch name usable in file names: `/` becomes `-`.
fn branch_prefix(branch: &str) -> String {
  branch.replace('/', "-")
}

/// Branch checked out at `source` when it is a local directory, else empty.
fn checkout_branch(scm: &dyn Scm, source: &str) -> String {
  let dir = Path::new(source);
  if !dir.is_dir() {
    return String::new();
  }
  match scm.branch_or_ref(dir) {
    Ok(branch) => branch_prefix(&branch),
    Err(e) => {
      debug!(source = %source, error = %e, "could not determine checked out branch");
      String::new()
    }
  }
}

/// Branch of the recipe repository, as `(basename, stream)`.
///
/// The stream is the basename without a `-patches` suffix, or empty when
/// there is no such suffix.
fn recipe_branch(scm: &dyn Scm, config_dir: &Path) -> (String, String) {
  let branch = match scm.branch_or_ref(config_dir) {
    Ok(branch) => branch,
    Err(e) => {
      debug!(error = %e, "could not determine recipe repository branch");
      return (String::new(), String::new());
    }
  };
  let basename = branch.strip_prefix("refs/heads/").unwrap_or(&branch).to_string();
  let stream = basename.strip_suffix("-patches").unwrap_or("").to_string();
  (basename, stream)
}

fn find_devel_packages(order: &[String], opts: &PrepareOptions) -> Result<BTreeSet<String>, PrepareError> {
  if opts.force_tracked {
    return Ok(BTreeSet::new());
  }
  let entries = match std::fs::read_dir(&opts.devel_root) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
    Err(source) => {
      return Err(PrepareError::Scan {
        path: opts.devel_root.clone(),
        source,
      });
    }
  };
  let candidates: Vec<String> = entries
    .filter_map(|e| e.ok())
    .filter(|e| e.path().is_dir())
    .filter_map(|e| e.file_name().to_str().map(str::to_string))
    .collect();

  let mut devel = BTreeSet::new();
  let mut misspelt = Vec::new();
  for name in order.iter().filter(|n| !opts.no_local.contains(n)) {
    if candidates.contains(name) {
      devel.insert(name.clone());
    } else if let Some(dir) = candidates.iter().find(|c| c.to_uppercase() == name.to_uppercase()) {
      misspelt.push(format!("{dir} (should be {name})"));
    }
  }

  if !misspelt.is_empty() {
    return Err(PrepareError::WrongSpelling { packages: misspelt });
  }
  Ok(devel)
}

/// Values available to version templates.
pub struct VersionContext<'a> {
  pub commit_hash: &'a str,
  pub tag: &'a str,
  pub defaults: &'a str,
  pub branch_basename: &'a str,
  pub branch_stream: &'a str,
  pub now: &'a NaiveDateTime,
}

/// Expand `%(name)s` placeholders in a version template.
pub fn resolve_version(template: &str, ctx: &VersionContext<'_>) -> String {
  let short_hash: String = ctx.commit_hash.chars().take(SHORT_HASH_LEN).collect();
  let tag_basename = ctx.tag.rsplit('/').next().unwrap_or(ctx.tag);
  let branch_stream = if ctx.branch_stream.is_empty() { ctx.tag } else { ctx.branch_stream };
  let defaults_upper = if ctx.defaults == "release" {
    String::new()
  } else {
    format!("_{}", ctx.defaults.to_uppercase().replace('-', "_"))
  };

  let expanded = substitute(
    template,
    &[
      ("commit_hash", ctx.commit_hash),
      ("short_hash", &short_hash),
      ("tag", ctx.tag),
      ("tag_basename", tag_basename),
      ("branch_basename", ctx.branch_basename),
      ("branch_stream", branch_stream),
      ("defaults_upper", &defaults_upper),
    ],
  );
  expand_date(&expanded, ctx.now)
}

/// Expand the `%(year)s`, `%(month)s`, `%(day)s` and `%(hour)s` placeholders.
pub fn expand_date(template: &str, now: &NaiveDateTime) -> String {
  substitute(
    template,
    &[
      ("year", &now.format("%Y").to_string()),
      ("month", &now.format("%m").to_string()),
      ("day", &now.format("%d").to_string()),
      ("hour", &now.format("%H").to_string()),
    ],
  )
}

fn substitute(template: &str, values: &[(&str, &str)]) -> String {
  let mut out = template.to_string();
  for (key, value) in values {
    out = out.replace(&format!("%({key})s"), value);
  }
  out
}

/// Fill the `full_*_requires` closures. `order` must list dependencies first.
fn compute_closures(specs: &mut SpecArena, order: &[String]) {
  for name in order {
    let Some(spec) = specs.get(name) else { continue };

    let mut full: BTreeSet<String> = spec.requires.iter().cloned().collect();
    let mut runtime: BTreeSet<String> = spec.runtime_requires.iter().cloned().collect();
    for dep in &spec.requires {
      if let Some(dep_spec) = specs.get(dep) {
        full.extend(dep_spec.full_requires.iter().cloned());
      }
    }
    for dep in &spec.runtime_requires {
      if let Some(dep_spec) = specs.get(dep) {
        runtime.extend(dep_spec.full_runtime_requires.iter().cloned());
      }
    }
    let build: BTreeSet<String> = full.difference(&runtime).cloned().collect();

    if let Some(spec) = specs.get_mut(name) {
      spec.full_requires = full;
      spec.full_runtime_requires = runtime;
      spec.full_build_requires = build;
    }
  }
}
