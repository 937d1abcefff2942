//! Content hashing of package build inputs.
//!
//! A package's hash covers its recipe, version, name, source revision,
//! environment and the hashes of everything it requires. Because a shared
//! cache may hold the same build under a different but equivalent tag, the
//! digest is forked into one alternative per way of naming the commit being
//! built. The first alternative is the primary hash; the rest are only used
//! to recognise existing artifacts.

use thiserror::Error;
use tracing::debug;

use crate::consts::MAX_EQUIVALENT_HASHES;
use crate::recipe::{OrderedMap, StringOrList};
use crate::spec::{PackageSpec, SpecArena, SpecHashes};
use crate::util::hash::Hasher;

const TAG_REF_PREFIX: &str = "refs/tags/";

/// Errors that can occur while hashing a package.
#[derive(Debug, Error)]
pub enum HashError {
  #[error("cannot hash unknown package {0}")]
  UnknownPackage(String),

  #[error("cannot hash {package}: dependency {dependency} has no hash yet")]
  DependencyNotHashed { package: String, dependency: String },
}

/// One way of naming the commit being built, with its forked digest.
struct Alternative {
  tag: String,
  commit: String,
  hasher: Hasher,
}

/// Compute and store the hashes of `package`.
///
/// Every dependency must already have its chosen `hash`. A spec that already
/// carries hashes is left untouched.
pub fn compute_hashes(package: &str, specs: &mut SpecArena, consider_relocation: bool) -> Result<(), HashError> {
  let spec = specs
    .get(package)
    .ok_or_else(|| HashError::UnknownPackage(package.to_string()))?;
  if spec.hashes.is_some() {
    return Ok(());
  }

  let dependencies = dependency_hashes(spec, specs)?;
  let hashes = hash_spec(spec, &dependencies, consider_relocation, force_rebuild_nonce);

  debug!(
    package = %package,
    hash = %hashes.remote_revision_hash,
    alternatives = hashes.remote_hashes.len(),
    "computed package hashes"
  );

  if let Some(spec) = specs.get_mut(package) {
    spec.hashes = Some(hashes);
  }
  Ok(())
}

/// `(hash, hash + devel hash)` of every requirement, in `requires` order.
fn dependency_hashes(spec: &PackageSpec, specs: &SpecArena) -> Result<Vec<(String, String)>, HashError> {
  spec
    .requires
    .iter()
    .filter_map(|dep| specs.get(dep))
    .map(|dep| match (&dep.hash, dep.hash_and_devel()) {
      (Some(hash), Some(with_devel)) => Ok((hash.clone(), with_devel)),
      _ => Err(HashError::DependencyNotHashed {
        package: spec.package.clone(),
        dependency: dep.package.clone(),
      }),
    })
    .collect()
}

fn force_rebuild_nonce() -> String {
  chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn hash_spec(
  spec: &PackageSpec,
  dependencies: &[(String, String)],
  consider_relocation: bool,
  nonce: impl Fn() -> String,
) -> SpecHashes {
  let mut base = Hasher::new();
  if spec.force_rebuild {
    base.update(nonce());
  }
  base.update(&spec.recipe);
  base.update(&spec.version);
  base.update(&spec.package);

  let mut alternatives = alternatives(spec, &base);

  let env = canonical_env(&spec.env);
  let append_path = canonical_paths(&spec.append_path);
  let prepend_path = canonical_paths(&spec.prepend_path);
  for alt in &mut alternatives {
    alt.hasher.update(&env);
    alt.hasher.update(&append_path);
    alt.hasher.update(&prepend_path);
    if alt.commit == alt.tag {
      alt.hasher.update(spec.source.as_deref().unwrap_or("none"));
      if spec.source.is_some() {
        alt.hasher.update(&alt.tag);
      }
    }
  }

  let mut deps_hash = Hasher::new();
  for (hash, with_devel) in dependencies {
    let folded = if spec.is_devel_pkg { hash } else { with_devel };
    fold(&mut alternatives, folded);
    deps_hash.update(with_devel);
  }

  let mut incremental_hash = None;
  if spec.is_devel_pkg {
    match &spec.incremental_recipe {
      Some(incremental) => {
        fold(&mut alternatives, incremental);
        let mut ih = Hasher::new();
        ih.update(incremental);
        incremental_hash = Some(ih.hexdigest());
      }
      None => fold(&mut alternatives, spec.devel_hash.as_deref().unwrap_or("")),
    }
  }

  if consider_relocation && !spec.relocate_paths.is_empty() {
    let mut paths = spec.relocate_paths.clone();
    paths.sort();
    fold(&mut alternatives, format!("relocate:{}", paths.join(" ")));
  }

  let remote_hashes = equivalent_hashes(&alternatives);
  fold(&mut alternatives, "local");
  let local_hashes = equivalent_hashes(&alternatives);

  SpecHashes {
    remote_revision_hash: remote_hashes[0].clone(),
    local_revision_hash: local_hashes[0].clone(),
    remote_hashes,
    local_hashes,
    deps_hash: deps_hash.hexdigest(),
    incremental_hash,
  }
}

/// Fork `base` once per name of the commit being built. The first entry is
/// the primary alternative and is always present.
fn alternatives(spec: &PackageSpec, base: &Hasher) -> Vec<Alternative> {
  let fork = |tag: &str, commit: &str| {
    let mut hasher = base.clone();
    hasher.update(commit);
    Alternative {
      tag: tag.to_string(),
      commit: commit.to_string(),
      hasher,
    }
  };

  let real_commit = spec
    .scm_refs
    .get(&format!("{TAG_REF_PREFIX}{}", spec.commit_hash))
    .map(String::as_str)
    .unwrap_or(&spec.commit_hash);

  let mut alternatives = vec![fork(&spec.tag, &spec.commit_hash), fork(&spec.tag, real_commit)];

  for (reference, commit) in &spec.scm_refs {
    if commit != real_commit {
      continue;
    }
    if let Some(tag_name) = reference.strip_prefix(TAG_REF_PREFIX) {
      // Other tags on the same commit hash their name in place of the commit.
      let mut hasher = base.clone();
      hasher.update(tag_name);
      alternatives.push(Alternative {
        tag: tag_name.to_string(),
        commit: commit.clone(),
        hasher,
      });
    }
  }

  alternatives
}

fn fold(alternatives: &mut [Alternative], data: impl AsRef<[u8]>) {
  for alt in alternatives {
    alt.hasher.update(data.as_ref());
  }
}

/// Distinct digests, primary first.
fn equivalent_hashes(alternatives: &[Alternative]) -> Vec<String> {
  let mut hashes: Vec<String> = Vec::new();
  for alt in alternatives {
    let digest = alt.hasher.hexdigest();
    if !hashes.contains(&digest) {
      hashes.push(digest);
    }
    if hashes.len() == MAX_EQUIVALENT_HASHES {
      break;
    }
  }
  hashes
}

fn canonical_env(map: &OrderedMap<String>) -> String {
  if map.is_empty() {
    return "none".to_string();
  }
  let entries: Vec<String> = map.iter().map(|(k, v)| format!("({k:?}, {v:?})")).collect();
  format!("[{}]", entries.join(", "))
}

fn canonical_paths(map: &OrderedMap<StringOrList>) -> String {
  if map.is_empty() {
    return "none".to_string();
  }
  let entries: Vec<String> = map
    .iter()
    .map(|(k, v)| match v {
      StringOrList::One(s) => format!("({k:?}, {s:?})"),
      StringOrList::Many(list) => format!("({k:?}, {list:?})"),
    })
    .collect();
  format!("[{}]", entries.join(", "))
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  fn spec(name: &str, requires: &[&str]) -> PackageSpec {
    PackageSpec {
      package: name.to_string(),
      version: "1.0".to_string(),
      tag: "v1.0".to_string(),
      commit_hash: "v1.0".to_string(),
      source: Some("https://example.org/repo.git".to_string()),
      recipe: "make install".to_string(),
      requires: requires.iter().map(|s| s.to_string()).collect(),
      ..Default::default()
    }
  }

  fn hashed(mut spec: PackageSpec, hash: &str) -> PackageSpec {
    spec.hash = Some(hash.to_string());
    spec
  }

  fn fixed_nonce() -> String {
    "nonce".to_string()
  }

  mod determinism {
    use super::*;

    #[test]
    fn same_inputs_same_hashes() {
      let a = hash_spec(&spec("zlib", &[]), &[], false, fixed_nonce);
      let b = hash_spec(&spec("zlib", &[]), &[], false, fixed_nonce);
      assert_eq!(a, b);
      assert_eq!(a.remote_revision_hash.len(), 64);
    }

    #[test]
    fn recipe_version_and_name_matter() {
      let base = hash_spec(&spec("zlib", &[]), &[], false, fixed_nonce).remote_revision_hash;

      let mut other = spec("zlib", &[]);
      other.recipe = "make -j4 install".to_string();
      assert_ne!(hash_spec(&other, &[], false, fixed_nonce).remote_revision_hash, base);

      let mut other = spec("zlib", &[]);
      other.version = "1.1".to_string();
      assert_ne!(hash_spec(&other, &[], false, fixed_nonce).remote_revision_hash, base);

      assert_ne!(
        hash_spec(&spec("libz", &[]), &[], false, fixed_nonce).remote_revision_hash,
        base
      );
    }

    #[test]
    fn env_order_matters() {
      let mut first = spec("zlib", &[]);
      first.env.insert("A", "1".to_string());
      first.env.insert("B", "2".to_string());
      let mut second = spec("zlib", &[]);
      second.env.insert("B", "2".to_string());
      second.env.insert("A", "1".to_string());
      assert_ne!(
        hash_spec(&first, &[], false, fixed_nonce).remote_revision_hash,
        hash_spec(&second, &[], false, fixed_nonce).remote_revision_hash
      );
    }

    #[test]
    fn force_rebuild_folds_in_nonce() {
      let mut forced = spec("zlib", &[]);
      forced.force_rebuild = true;
      let a = hash_spec(&forced, &[], false, || "1".to_string());
      let b = hash_spec(&forced, &[], false, || "2".to_string());
      assert_ne!(a.remote_revision_hash, b.remote_revision_hash);
    }
  }

  mod dependencies {
    use super::*;

    #[test]
    fn dependency_hash_change_changes_dependent() {
      let root = spec("root", &["zlib"]);
      let a = hash_spec(&root, &[("aaa".to_string(), "aaa".to_string())], false, fixed_nonce);
      let b = hash_spec(&root, &[("bbb".to_string(), "bbb".to_string())], false, fixed_nonce);
      assert_ne!(a.remote_revision_hash, b.remote_revision_hash);
      assert_ne!(a.deps_hash, b.deps_hash);
    }

    #[test]
    fn devel_package_ignores_dependency_devel_hash_but_deps_hash_does_not() {
      let mut root = spec("root", &["zlib"]);
      root.is_devel_pkg = true;
      root.devel_hash = Some("local".to_string());
      let a = hash_spec(&root, &[("aaa".to_string(), "aaaX".to_string())], false, fixed_nonce);
      let b = hash_spec(&root, &[("aaa".to_string(), "aaaY".to_string())], false, fixed_nonce);
      assert_eq!(a.remote_revision_hash, b.remote_revision_hash);
      assert_ne!(a.deps_hash, b.deps_hash);
    }

    #[test]
    fn unhashed_dependency_is_an_error() {
      let mut specs = SpecArena::new();
      specs.insert(spec("zlib", &[]));
      specs.insert(spec("root", &["zlib"]));
      let err = compute_hashes("root", &mut specs, false).unwrap_err();
      assert!(matches!(err, HashError::DependencyNotHashed { dependency, .. } if dependency == "zlib"));
    }

    #[test]
    fn compute_hashes_stores_result_once() {
      let mut specs = SpecArena::new();
      specs.insert(hashed(spec("zlib", &[]), "abc"));
      specs.insert(spec("root", &["zlib", "not-in-table"]));
      compute_hashes("root", &mut specs, false).unwrap();
      let first = specs.get("root").unwrap().hashes.clone().unwrap();

      specs.get_mut("zlib").unwrap().hash = Some("changed".to_string());
      compute_hashes("root", &mut specs, false).unwrap();
      assert_eq!(specs.get("root").unwrap().hashes.as_ref(), Some(&first));
    }

    #[test]
    fn unknown_package_is_an_error() {
      let mut specs = SpecArena::new();
      assert!(matches!(
        compute_hashes("ghost", &mut specs, false),
        Err(HashError::UnknownPackage(_))
      ));
    }
  }

  mod alternatives {
    use super::*;

    #[test]
    fn tag_and_branch_on_same_commit_share_a_hash() {
      let commit = "0123456789abcdef0123456789abcdef01234567";
      let refs: BTreeMap<String, String> = [
        ("refs/tags/v1.0".to_string(), commit.to_string()),
        ("refs/heads/master".to_string(), commit.to_string()),
      ]
      .into_iter()
      .collect();

      let mut by_tag = spec("zlib", &[]);
      by_tag.scm_refs = refs.clone();

      let mut by_branch = spec("zlib", &[]);
      by_branch.tag = "master".to_string();
      by_branch.commit_hash = commit.to_string();
      by_branch.scm_refs = refs;

      let tag_hashes = hash_spec(&by_tag, &[], false, fixed_nonce);
      let branch_hashes = hash_spec(&by_branch, &[], false, fixed_nonce);
      assert_ne!(tag_hashes.remote_revision_hash, branch_hashes.remote_revision_hash);
      assert!(
        tag_hashes
          .remote_hashes
          .iter()
          .any(|h| branch_hashes.remote_hashes.contains(h))
      );
    }

    #[test]
    fn primary_comes_first_and_list_is_distinct() {
      let hashes = hash_spec(&spec("zlib", &[]), &[], false, fixed_nonce);
      assert_eq!(hashes.remote_hashes[0], hashes.remote_revision_hash);
      assert_eq!(hashes.remote_hashes.len(), 1);
      assert_eq!(hashes.local_hashes[0], hashes.local_revision_hash);
    }

    #[test]
    fn list_is_capped() {
      let commit = "0123456789abcdef0123456789abcdef01234567";
      let mut s = spec("zlib", &[]);
      s.commit_hash = commit.to_string();
      s.scm_refs = (0..40).map(|i| (format!("refs/tags/t{i}"), commit.to_string())).collect();
      let hashes = hash_spec(&s, &[], false, fixed_nonce);
      assert_eq!(hashes.remote_hashes.len(), MAX_EQUIVALENT_HASHES);
      assert_eq!(hashes.local_hashes.len(), MAX_EQUIVALENT_HASHES);
    }

    #[test]
    fn local_hashes_never_equal_remote_ones() {
      let hashes = hash_spec(&spec("zlib", &[]), &[], false, fixed_nonce);
      assert!(hashes.local_hashes.iter().all(|h| !hashes.remote_hashes.contains(h)));
    }
  }

  mod devel {
    use super::*;

    #[test]
    fn devel_hash_changes_package_hash() {
      let mut a = spec("zlib", &[]);
      a.is_devel_pkg = true;
      a.devel_hash = Some("c1".to_string());
      let mut b = a.clone();
      b.devel_hash = Some("c2".to_string());
      assert_ne!(
        hash_spec(&a, &[], false, fixed_nonce).remote_revision_hash,
        hash_spec(&b, &[], false, fixed_nonce).remote_revision_hash
      );
    }

    #[test]
    fn incremental_recipe_replaces_devel_hash() {
      let mut a = spec("zlib", &[]);
      a.is_devel_pkg = true;
      a.incremental_recipe = Some("make".to_string());
      a.devel_hash = Some("c1".to_string());
      let mut b = a.clone();
      b.devel_hash = Some("c2".to_string());
      let ha = hash_spec(&a, &[], false, fixed_nonce);
      let hb = hash_spec(&b, &[], false, fixed_nonce);
      assert_eq!(ha.remote_revision_hash, hb.remote_revision_hash);
      assert!(ha.incremental_hash.is_some());
    }

    #[test]
    fn relocation_only_when_considered() {
      let mut s = spec("zlib", &[]);
      s.relocate_paths = vec!["lib/b".to_string(), "bin/a".to_string()];
      let plain = spec("zlib", &[]);
      assert_eq!(
        hash_spec(&s, &[], false, fixed_nonce).remote_revision_hash,
        hash_spec(&plain, &[], false, fixed_nonce).remote_revision_hash
      );
      assert_ne!(
        hash_spec(&s, &[], true, fixed_nonce).remote_revision_hash,
        hash_spec(&plain, &[], true, fixed_nonce).remote_revision_hash
      );
    }
  }

  #[test]
  fn canonical_forms() {
    assert_eq!(canonical_env(&OrderedMap::new()), "none");
    let mut env = OrderedMap::new();
    env.insert("A", "x".to_string());
    assert_eq!(canonical_env(&env), "[(\"A\", \"x\")]");

    let mut paths = OrderedMap::new();
    paths.insert("PATH", StringOrList::Many(vec!["bin".to_string(), "sbin".to_string()]));
    assert_eq!(canonical_paths(&paths), "[(\"PATH\", [\"bin\", \"sbin\"])]");
  }
}
