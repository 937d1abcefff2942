//! Environment of build scripts and the `init.sh` files installed with packages.

use crate::recipe::StringOrList;
use crate::spec::{PackageSpec, SpecArena};

use super::types::BuildRequest;

/// Variable an `init.sh` reads its architecture directory from, so a tree
/// can be sourced from a differently named location.
pub const ARCH_PREFIX_VAR: &str = "KILN_ARCH_PREFIX";

/// Directories under which a dependency's build script finds its inputs.
#[derive(Debug, Clone)]
pub struct BuildPaths {
  pub build_dir: String,
  pub install_root: String,
  pub source_dir: String,
}

/// `zlib-ng` → `ZLIB_NG`, the prefix of a package's exported variables.
pub fn variable_prefix(package: &str) -> String {
  package.to_uppercase().replace('-', "_")
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
  if !value.is_empty()
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
  {
    return value.to_string();
  }
  format!("'{}'", value.replace('\'', r"'\''"))
}

/// Generate `etc/profile.d/init.sh` for `spec`.
///
/// The dependency part is needed during the build itself. With `post_build`
/// the package's own variables are exported as well; those only make sense
/// once its install tree exists.
pub fn init_script(spec: &PackageSpec, specs: &SpecArena, architecture: &str, post_build: bool) -> String {
  let mut lines = vec![format!(": \"${{{ARCH_PREFIX_VAR}:={architecture}}}\"")];

  for dep in spec.requires.iter().filter_map(|d| specs.get(d)) {
    let Some(revision) = dep.revision else { continue };
    let prefix = variable_prefix(&dep.package);
    lines.push(format!(
      "[ -n \"${{{prefix}_REVISION}}\" ] || . \"$WORK_DIR/${ARCH_PREFIX_VAR}\"/{}/{}-{}/etc/profile.d/init.sh",
      shell_quote(&dep.package),
      shell_quote(&dep.version),
      shell_quote(&revision.to_string()),
    ));
  }

  if !post_build {
    return lines.join("\n");
  }

  let prefix = variable_prefix(&spec.package);
  let revision = spec.revision.map(|r| r.to_string()).unwrap_or_default();
  lines.push(format!(
    "export {prefix}_ROOT=\"$WORK_DIR/${ARCH_PREFIX_VAR}\"/{}/{}-{}",
    shell_quote(&spec.package),
    shell_quote(&spec.version),
    shell_quote(&revision),
  ));
  lines.push(format!("export {prefix}_VERSION={}", shell_quote(&spec.version)));
  lines.push(format!("export {prefix}_REVISION={}", shell_quote(&revision)));
  lines.push(format!(
    "export {prefix}_HASH={}",
    shell_quote(spec.hash.as_deref().unwrap_or(""))
  ));
  lines.push(format!("export {prefix}_COMMIT={}", shell_quote(&spec.commit_hash)));

  // Values stay double quoted so they can refer to other variables.
  for (key, value) in spec.env.iter().filter(|(k, _)| *k != "DYLD_LIBRARY_PATH") {
    lines.push(format!("export {key}=\"{value}\""));
  }
  for (key, value) in spec.append_path.iter().filter(|(k, _)| *k != "DYLD_LIBRARY_PATH") {
    lines.push(format!("export {key}=\"${key}:{}\"", value.to_vec().join(":")));
  }

  let mut prepend: Vec<(String, Vec<String>)> = spec
    .prepend_path
    .iter()
    .map(|(k, v): (&str, &StringOrList)| (k.to_string(), v.to_vec()))
    .collect();
  for (key, dir) in [("PATH", "bin"), ("LD_LIBRARY_PATH", "lib")] {
    let entry = format!("${prefix}_ROOT/{dir}");
    match prepend.iter_mut().find(|(k, _)| k == key) {
      Some((_, values)) => values.insert(0, entry),
      None => prepend.push((key.to_string(), vec![entry])),
    }
  }
  for (key, values) in prepend.iter().filter(|(k, _)| k != "DYLD_LIBRARY_PATH") {
    lines.push(format!("export {key}=\"{}${{{key}+:${key}}}\"", values.join(":")));
  }

  lines.join("\n")
}

/// Variables exported to the build script of `request`.
pub fn build_environment(request: &BuildRequest<'_>, paths: &BuildPaths) -> Vec<(String, String)> {
  let spec = request.spec;
  let options = request.options;
  // A real commit is shortened; a tag is passed as is.
  let commit_hash = if spec.tag != spec.commit_hash {
    spec.commit_hash.chars().take(10).collect()
  } else {
    spec.commit_hash.clone()
  };

  let hashes = spec.hashes.as_ref();
  let mut env = vec![
    ("ARCHITECTURE", options.architecture.clone()),
    ("BUILD_FAMILY", spec.build_family.clone()),
    ("BUILD_REQUIRES", words(&spec.build_requires)),
    ("BUILDDIR", paths.build_dir.clone()),
    (
      "CACHED_TARBALL",
      request
        .cached_tarball
        .map(|p| p.display().to_string())
        .unwrap_or_default(),
    ),
    ("CAN_DELETE", (if options.aggressive_cleanup { "1" } else { "" }).to_string()),
    ("COMMIT_HASH", commit_hash),
    ("CONFIG_DIR", options.config_dir.display().to_string()),
    ("DEPS_HASH", hashes.map(|h| h.deps_hash.clone()).unwrap_or_default()),
    ("DEVEL_HASH", spec.devel_hash.clone().unwrap_or_default()),
    ("DEVEL_PREFIX", spec.devel_prefix.clone().unwrap_or_default()),
    ("FULL_BUILD_REQUIRES", words(&spec.full_build_requires)),
    ("FULL_REQUIRES", words(&spec.full_requires)),
    ("FULL_RUNTIME_REQUIRES", words(&spec.full_runtime_requires)),
    ("GIT_COMMITTER_EMAIL", "unknown".to_string()),
    ("GIT_COMMITTER_NAME", "unknown".to_string()),
    ("GIT_TAG", spec.tag.clone()),
    (
      "INCREMENTAL_BUILD_HASH",
      hashes
        .and_then(|h| h.incremental_hash.clone())
        .unwrap_or_else(|| "0".to_string()),
    ),
    ("INSTALLROOT", paths.install_root.clone()),
    ("JOBS", options.jobs.to_string()),
    ("PKGHASH", spec.hash.clone().unwrap_or_default()),
    ("PKGNAME", spec.package.clone()),
    ("PKGREVISION", spec.revision.map(|r| r.to_string()).unwrap_or_default()),
    ("PKGVERSION", spec.version.clone()),
    ("RELOCATE_PATHS", words(&spec.relocate_paths)),
    ("REQUIRES", words(&spec.requires)),
    ("RUNTIME_REQUIRES", words(&spec.runtime_requires)),
    ("SOURCE0", spec.source.clone().unwrap_or_default()),
    ("SOURCEDIR", paths.source_dir.clone()),
    ("WORK_DIR", request.layout.work_dir().display().to_string()),
    (ARCH_PREFIX_VAR, options.architecture.clone()),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v))
  .collect::<Vec<_>>();

  env.extend(options.extra_env.iter().cloned());
  env
}

fn words<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
  items.into_iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
