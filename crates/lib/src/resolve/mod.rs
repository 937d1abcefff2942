//! Expanding requested packages into a complete table of specs.
//!
//! Resolution walks a FIFO queue seeded with the requested names. Each
//! package's recipe is read, overridden, checked against the host system and
//! normalized into a [`PackageSpec`]; its dependencies are queued in turn.

pub mod check;
pub mod filter;

use std::collections::{BTreeSet, HashMap, VecDeque};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{DEFAULTS_PACKAGE, SYSTEM_REPLACE_MARKER};
use crate::defaults::{DefaultsCheck, DefaultsError, OverrideTable, validate_defaults};
use crate::recipe::{Metadata, Recipe, RecipeError, RecipeStore, Taps, has_commands, parse_recipe};
use crate::spec::{PackageSpec, Requirement, SpecArena};

pub use check::{CheckOutput, ShellCheck, SystemCheck};
pub use filter::filter_requirements;

use filter::prefix_match;

/// Errors that abort resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Defaults(#[from] DefaultsError),

  #[error("{file} has different package field: {found}")]
  PackageMismatch { file: String, found: String },

  #[error("{requested} should be spelt {expected}")]
  Misspelt { requested: String, expected: String },

  #[error("malformed {field} '{pattern}' in {package}: {message}")]
  MalformedRegex {
    package: String,
    field: String,
    pattern: String,
    message: String,
  },

  #[error("Could not find named replacement spec for {package}: {key}")]
  MissingReplacement { package: String, key: String },

  #[error("system requirement {package} cannot have a recipe")]
  RequirementWithRecipe { package: String },

  #[error("version of {package} in {file} must be a string")]
  VersionNotString { package: String, file: String },

  #[error("failed to run system check for {package}: {source}")]
  Check {
    package: String,
    #[source]
    source: std::io::Error,
  },
}

/// Which packages may be taken from the host system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NoSystem {
  /// Every package may use the system version.
  #[default]
  None,
  /// No package may use the system version.
  All,
  /// The listed packages may not use the system version.
  Only(Vec<String>),
}

impl NoSystem {
  /// Parse the command-line form: `*` for all, otherwise a comma-separated list.
  pub fn parse(value: &str) -> Self {
    match value.trim() {
      "" => NoSystem::None,
      "*" => NoSystem::All,
      list => NoSystem::Only(list.split(',').map(|s| s.trim().to_string()).collect()),
    }
  }

  pub fn excludes(&self, package: &str) -> bool {
    match self {
      NoSystem::None => false,
      NoSystem::All => true,
      NoSystem::Only(list) => list.iter().any(|p| p == package),
    }
  }
}

/// Everything resolution depends on besides the recipes themselves.
#[derive(Debug, Clone)]
pub struct ResolveContext {
  pub architecture: String,
  pub defaults: String,
  pub disable: Vec<String>,
  pub overrides: OverrideTable,
  pub taps: Taps,
  /// Run `prefer_system_check` even when `prefer_system` does not match.
  pub prefer_system: bool,
  pub no_system: NoSystem,
  pub force_rebuild: Vec<String>,
}

impl ResolveContext {
  pub fn new(architecture: impl Into<String>, defaults: impl Into<String>) -> Self {
    Self {
      architecture: architecture.into(),
      defaults: defaults.into(),
      disable: Vec::new(),
      overrides: OverrideTable::new(),
      taps: Taps::new(),
      prefer_system: false,
      no_system: NoSystem::None,
      force_rebuild: Vec::new(),
    }
  }
}

/// Defaults every resolved package accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidDefaults {
  /// No package restricts defaults.
  #[default]
  Unconstrained,
  /// Intersection of every package's valid defaults, in first-seen order.
  Constrained(Vec<String>),
  /// Two packages accept disjoint sets of defaults.
  Incompatible,
}

impl ValidDefaults {
  /// Narrow the running set with one package's valid defaults.
  pub fn narrow(self, valid: &[String]) -> Self {
    if valid.is_empty() {
      return self;
    }
    match self {
      ValidDefaults::Unconstrained => ValidDefaults::Constrained(valid.to_vec()),
      ValidDefaults::Constrained(current) => {
        let common: Vec<String> = current.into_iter().filter(|d| valid.contains(d)).collect();
        if common.is_empty() {
          ValidDefaults::Incompatible
        } else {
          ValidDefaults::Constrained(common)
        }
      }
      ValidDefaults::Incompatible => ValidDefaults::Incompatible,
    }
  }

  /// Whether `defaults` is acceptable to every package.
  pub fn allows(&self, defaults: &str) -> bool {
    match self {
      ValidDefaults::Unconstrained => true,
      ValidDefaults::Constrained(valid) => valid.iter().any(|d| d == defaults),
      ValidDefaults::Incompatible => false,
    }
  }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
  pub specs: SpecArena,
  pub system_packages: BTreeSet<String>,
  pub own_packages: BTreeSet<String>,
  /// Packages whose system requirement check failed, with the recipe's hint.
  pub failed_requirements: Vec<(String, Option<String>)>,
  pub valid_defaults: ValidDefaults,
  /// Every package disabled during resolution, explicit or discovered.
  pub disabled: BTreeSet<String>,
}

/// Resolve `requested` and everything it depends on.
pub fn resolve(
  requested: &[String],
  store: &RecipeStore<'_>,
  ctx: &ResolveContext,
  checker: &dyn SystemCheck,
) -> Result<Resolution, ResolveError> {
  let mut resolver = Resolver {
    store,
    ctx,
    checker,
    disabled: ctx.disable.iter().cloned().collect(),
    prefer_cache: HashMap::new(),
    requirement_cache: HashMap::new(),
    resolution: Resolution::default(),
  };
  resolver.run(requested)?;
  Ok(resolver.finish())
}

struct Resolver<'a, 'b> {
  store: &'a RecipeStore<'b>,
  ctx: &'a ResolveContext,
  checker: &'a dyn SystemCheck,
  disabled: BTreeSet<String>,
  prefer_cache: HashMap<String, CheckOutput>,
  requirement_cache: HashMap<String, CheckOutput>,
  resolution: Resolution,
}

impl Resolver<'_, '_> {
  fn run(&mut self, requested: &[String]) -> Result<(), ResolveError> {
    let mut queue: VecDeque<String> = requested.iter().cloned().collect();

    while let Some(name) = queue.pop_front() {
      if self.resolution.specs.contains(&name) || self.disabled.contains(&name) {
        continue;
      }
      if let Some(spec) = self.resolve_one(&name)? {
        queue.extend(spec.requires.iter().cloned());
        self.resolution.specs.insert(spec);
      }
    }
    Ok(())
  }

  fn finish(mut self) -> Resolution {
    // Packages disabled after a dependent was resolved must not stay referenced.
    let disabled = &self.disabled;
    for spec in self.resolution.specs.iter_mut() {
      spec.requires.retain(|r| !disabled.contains(r));
      spec.build_requires.retain(|r| !disabled.contains(r));
      spec.runtime_requires.retain(|r| !disabled.contains(r));
    }
    self.resolution.disabled = self.disabled;
    self.resolution
  }

  fn resolve_one(&mut self, name: &str) -> Result<Option<PackageSpec>, ResolveError> {
    let lower = name.to_lowercase();
    let is_defaults = name == DEFAULTS_PACKAGE;
    let key = if is_defaults && !self.ctx.taps.contains_key(&lower) {
      format!("defaults-{}", self.ctx.defaults)
    } else {
      lower.clone()
    };

    let text = self.store.read(&key, &self.ctx.taps)?;
    let Recipe { mut metadata, mut body } = parse_recipe(&text.file, &text.text)?;

    if is_defaults {
      if has_commands(&body) {
        warn!(file = %text.file, "defaults file has a build script, which is ignored");
      }
      body.clear();
    }

    let declared = metadata.package.clone().unwrap_or_default();
    if declared.to_lowercase() != lower {
      return Err(ResolveError::PackageMismatch {
        file: text.file,
        found: declared,
      });
    }
    if declared != name {
      return Err(ResolveError::Misspelt {
        requested: name.to_string(),
        expected: declared,
      });
    }

    self.ctx.overrides.apply(name, &mut metadata);

    let mut requirement = Requirement::Own;
    match self.prefer_system(name, &metadata)? {
      SystemChoice::NotChecked => {}
      SystemChoice::Build => {
        self.resolution.own_packages.insert(name.to_string());
      }
      SystemChoice::UseSystem => {
        info!(package = %name, "using system version");
        self.resolution.system_packages.insert(name.to_string());
        self.disabled.insert(name.to_string());
      }
      SystemChoice::Replace(replacement) => {
        let has_recipe = replacement.recipe.as_deref().is_some_and(|r| !r.trim().is_empty());
        body = replacement.recipe.clone().unwrap_or_default();
        metadata = *replacement;
        requirement = Requirement::Replacement { has_recipe };
        if has_recipe {
          self.resolution.own_packages.insert(name.to_string());
        } else {
          self.resolution.system_packages.insert(name.to_string());
        }
      }
    }

    self.system_requirement(name, &mut metadata, &body)?;

    if self.disabled.contains(name) {
      debug!(package = %name, "package disabled");
      return Ok(None);
    }

    let check = validate_defaults(name, metadata.valid_defaults.as_ref(), &self.ctx.defaults)?;
    if let DefaultsCheck::Rejected { message, .. } = &check {
      warn!(package = %name, "{message}");
    }
    let valid = check.valid().to_vec();
    self.resolution.valid_defaults = std::mem::take(&mut self.resolution.valid_defaults).narrow(&valid);

    let spec = self.build_spec(name, &text.file, metadata, body, requirement, valid)?;
    Ok(Some(spec))
  }

  /// Decide whether the system version of `name` should be used.
  fn prefer_system(&mut self, name: &str, metadata: &Metadata) -> Result<SystemChoice, ResolveError> {
    if self.ctx.no_system.excludes(name) {
      return Ok(SystemChoice::NotChecked);
    }
    let matches = match &metadata.prefer_system {
      Some(pattern) => prefix_match(name, "prefer_system", pattern, &self.ctx.architecture)?,
      None => false,
    };
    if !matches && !self.ctx.prefer_system {
      return Ok(SystemChoice::NotChecked);
    }

    let command = metadata.prefer_system_check.as_deref().unwrap_or("false").trim().to_string();
    let output = cached_check(&mut self.prefer_cache, self.checker, name, &command)?;
    if !output.success() {
      debug!(package = %name, "system version not usable, building");
      return Ok(SystemChoice::Build);
    }

    let Some(key) = replacement_key(&output.output) else {
      return Ok(SystemChoice::UseSystem);
    };

    let specs = metadata.prefer_system_replacement_specs.clone().unwrap_or_default();
    let mut replacement = None;
    for (pattern, candidate) in specs.iter() {
      if prefix_match(name, "prefer_system_replacement_specs", pattern, &key)? {
        replacement = Some(candidate.clone());
        break;
      }
    }
    let Some(mut replacement) = replacement else {
      return Err(ResolveError::MissingReplacement {
        package: name.to_string(),
        key,
      });
    };

    info!(package = %name, key = %key, "using replacement spec");
    replacement.package = Some(name.to_string());
    if replacement.version.is_none() {
      replacement.version = metadata.version.clone();
    }
    if let Some(version) = replacement.version_str() {
      replacement.version = Some(serde_yaml::Value::String(version.replace("%(key)s", &key)));
    }
    Ok(SystemChoice::Replace(Box::new(replacement)))
  }

  fn system_requirement(&mut self, name: &str, metadata: &mut Metadata, body: &str) -> Result<(), ResolveError> {
    let Some(pattern) = metadata.system_requirement.clone() else {
      return Ok(());
    };
    if !body.trim().is_empty() {
      return Err(ResolveError::RequirementWithRecipe { package: name.to_string() });
    }
    if !prefix_match(name, "system_requirement", &pattern, &self.ctx.architecture)? {
      return Ok(());
    }

    let command = metadata
      .system_requirement_check
      .as_deref()
      .unwrap_or("false")
      .trim()
      .to_string();
    let output = cached_check(&mut self.requirement_cache, self.checker, name, &command)?;
    if output.success() {
      debug!(package = %name, "system requirement satisfied");
      self.disabled.insert(name.to_string());
    } else {
      warn!(package = %name, "system requirement not satisfied");
      self
        .resolution
        .failed_requirements
        .push((name.to_string(), metadata.system_requirement_missing.clone()));
      metadata.version = Some(serde_yaml::Value::String("failed".to_string()));
    }
    Ok(())
  }

  fn build_spec(
    &mut self,
    name: &str,
    file: &str,
    metadata: Metadata,
    body: String,
    requirement: Requirement,
    valid_defaults: Vec<String>,
  ) -> Result<PackageSpec, ResolveError> {
    let arch = &self.ctx.architecture;
    let defaults = &self.ctx.defaults;
    let (requires, mut disabled_by_arch) =
      filter_requirements(name, metadata.requires.as_deref().unwrap_or_default(), arch, defaults)?;
    let (mut build_requires, more) =
      filter_requirements(name, metadata.build_requires.as_deref().unwrap_or_default(), arch, defaults)?;
    disabled_by_arch.extend(more);

    let runtime_requires: Vec<String> = requires.into_iter().filter(|r| !self.disabled.contains(r)).collect();
    build_requires.retain(|r| !self.disabled.contains(r));
    if name != DEFAULTS_PACKAGE {
      build_requires.push(DEFAULTS_PACKAGE.to_string());
    }
    let requires: Vec<String> = runtime_requires.iter().chain(build_requires.iter()).cloned().collect();

    let raw_version = match &metadata.version {
      Some(serde_yaml::Value::String(v)) => v.clone(),
      _ => {
        return Err(ResolveError::VersionNotString {
          package: name.to_string(),
          file: file.to_string(),
        });
      }
    };

    let mut disabled = self.disabled.clone();
    disabled.extend(disabled_by_arch);

    Ok(PackageSpec {
      package: name.to_string(),
      version: raw_version.replace('/', "_"),
      tag: metadata.tag.clone().unwrap_or_else(|| raw_version.clone()),
      source: metadata.source.clone(),
      requires,
      build_requires,
      runtime_requires,
      disabled,
      recipe: body.trim_matches('\n').to_string(),
      incremental_recipe: metadata.incremental_recipe.clone(),
      env: metadata.env.clone().unwrap_or_default(),
      append_path: metadata.append_path.clone().unwrap_or_default(),
      prepend_path: metadata.prepend_path.clone().unwrap_or_default(),
      relocate_paths: metadata.relocate_paths.clone().unwrap_or_default(),
      valid_defaults: metadata.valid_defaults.as_ref().map(|_| valid_defaults),
      force_rebuild: metadata.force_rebuild.unwrap_or(false) || self.ctx.force_rebuild.iter().any(|p| p == name),
      requirement,
      ..Default::default()
    })
  }
}

/// Outcome of the prefer-system decision for one package.
enum SystemChoice {
  /// No check applies to this package.
  NotChecked,
  /// The check failed; build from the recipe.
  Build,
  UseSystem,
  Replace(Box<Metadata>),
}

fn cached_check(
  cache: &mut HashMap<String, CheckOutput>,
  checker: &dyn SystemCheck,
  package: &str,
  command: &str,
) -> Result<CheckOutput, ResolveError> {
  if let Some(output) = cache.get(package) {
    return Ok(output.clone());
  }
  let output = checker.check(package, command).map_err(|source| ResolveError::Check {
    package: package.to_string(),
    source,
  })?;
  cache.insert(package.to_string(), output.clone());
  Ok(output)
}

/// The key of an `alibuild_system_replace:<key>` line, if the output has one.
fn replacement_key(output: &str) -> Option<String> {
  output
    .lines()
    .find_map(|line| line.strip_prefix(SYSTEM_REPLACE_MARKER))
    .map(|key| key.trim().to_string())
}
