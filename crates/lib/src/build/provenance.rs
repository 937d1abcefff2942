//! `.meta/provenance.json`, a record of what went into an install tree.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::spec::SpecArena;

use super::types::BuildRequest;

#[derive(Debug, Serialize)]
pub struct Provenance<'a> {
  pub tool_version: &'static str,
  pub recipes_commit: Option<&'a str>,
  pub architecture: &'a str,
  pub defaults: &'a str,
  pub package: PackageInfo<'a>,
  pub dependencies: Dependencies,
}

#[derive(Debug, Serialize)]
pub struct PackageInfo<'a> {
  pub name: &'a str,
  pub tag: &'a str,
  pub source: Option<&'a str>,
  pub version: &'a str,
  pub revision: Option<String>,
  pub hash: Option<&'a str>,
}

/// Every dependency set, as `<pkg>-<ver>-<rev>` of the installed builds.
#[derive(Debug, Serialize)]
pub struct Dependencies {
  pub build: DependencySet,
  pub runtime: DependencySet,
}

#[derive(Debug, Serialize)]
pub struct DependencySet {
  pub direct: Vec<String>,
  pub recursive: Vec<String>,
}

impl<'a> Provenance<'a> {
  pub fn new(request: &BuildRequest<'a>) -> Self {
    let spec = request.spec;
    let specs = request.specs;
    let options = request.options;
    Self {
      tool_version: env!("CARGO_PKG_VERSION"),
      recipes_commit: options.recipes_commit.as_deref(),
      architecture: &options.architecture,
      defaults: &options.defaults,
      package: PackageInfo {
        name: &spec.package,
        tag: &spec.tag,
        source: spec.source.as_deref(),
        version: &spec.version,
        revision: spec.revision.map(|r| r.to_string()),
        hash: spec.hash.as_deref(),
      },
      dependencies: Dependencies {
        build: DependencySet {
          direct: describe(specs, &spec.build_requires),
          recursive: describe(specs, &spec.full_build_requires),
        },
        runtime: DependencySet {
          direct: describe(specs, &spec.runtime_requires),
          recursive: describe(specs, &spec.full_runtime_requires),
        },
      },
    }
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }
}

/// Names of the given packages with their version and revision, sorted.
/// Packages taken from the system have no revision and are listed by name.
fn describe<'a>(specs: &SpecArena, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
  names
    .into_iter()
    .map(|name| match specs.get(name).and_then(|dep| dep.version_revision()) {
      Some(vr) => format!("{name}-{vr}"),
      None => name.clone(),
    })
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}
