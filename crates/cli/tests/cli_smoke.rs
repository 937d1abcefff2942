//! CLI smoke tests for kiln.
//!
//! These tests run the binary against small recipe repositories in
//! temporary directories and check exit codes and output.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

const ARCH: &str = "slc9_x86-64";

/// Get a Command for the kiln binary.
fn kiln_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("kiln");
  cmd.env_remove("KILN_CONFIG_DIR");
  cmd.env_remove("KILN_WORK_DIR");
  cmd.env_remove("KILN_REMOTE_STORE");
  cmd
}

fn write_recipe(dir: &TempDir, name: &str, header: &str, body: &str) {
  std::fs::write(dir.path().join(format!("{name}.sh")), format!("{header}\n---\n{body}")).unwrap();
}

/// A recipe repository with `root` depending on `zlib`.
fn temp_recipes() -> TempDir {
  let dir = TempDir::new().unwrap();
  write_recipe(&dir, "defaults-release", "package: defaults-release\nversion: v1", "");
  write_recipe(
    &dir,
    "zlib",
    "package: zlib\nversion: v1.3",
    "mkdir -p \"$INSTALLROOT/lib\"\ntouch \"$INSTALLROOT/lib/libz.a\"\n",
  );
  write_recipe(
    &dir,
    "root",
    "package: root\nversion: v6\nrequires:\n  - zlib",
    "mkdir -p \"$INSTALLROOT/bin\"\ntouch \"$INSTALLROOT/bin/root\"\n",
  );
  dir
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  kiln_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  kiln_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("kiln"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "deps", "info", "doctor", "clean"] {
    kiln_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn build_requires_a_package() {
  kiln_cmd().arg("build").assert().failure();
}

// =============================================================================
// info
// =============================================================================

#[test]
fn info_shows_build_order() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["info", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Build order: defaults-release zlib root"))
    .stdout(predicate::str::contains(ARCH));
}

#[test]
fn info_shows_dependents() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["info", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("required by").and(predicate::str::contains("root")));
}

#[test]
fn info_json_lists_packages() {
  let recipes = temp_recipes();

  let output = kiln_cmd()
    .args(["info", "root", "-a", ARCH, "-o", "json", "-c"])
    .arg(recipes.path())
    .output()
    .unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["architecture"], ARCH);
  assert_eq!(json["build_order"][2], "root");
  assert_eq!(json["packages"][0]["package"], "zlib");
}

#[test]
fn info_with_missing_recipes_fails() {
  kiln_cmd()
    .args(["info", "root", "-a", ARCH, "-c", "/nonexistent/recipes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Cannot find recipes"));
}

#[test]
fn unknown_package_fails() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["info", "nosuchpkg", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .failure();
}

// =============================================================================
// deps
// =============================================================================

#[test]
fn deps_prints_dot_graph() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["deps", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .success()
    .stdout(predicate::str::starts_with("digraph {"))
    .stdout(predicate::str::contains("\"root\" -> \"zlib\""))
    .stdout(predicate::str::contains("defaults-release").not());
}

#[test]
fn deps_writes_outdot_file() {
  let recipes = temp_recipes();
  let out = TempDir::new().unwrap();
  let dot = out.path().join("root.dot");

  kiln_cmd()
    .args(["deps", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .arg("--outdot")
    .arg(&dot)
    .assert()
    .success();
  assert!(std::fs::read_to_string(&dot).unwrap().contains("fillcolor=gold"));
}

// =============================================================================
// doctor
// =============================================================================

#[cfg(unix)]
#[test]
fn doctor_healthy_recipes_exit_zero() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["doctor", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Everything can be built"));
}

#[cfg(unix)]
#[test]
fn doctor_reports_missing_requirement() {
  let recipes = temp_recipes();
  write_recipe(
    &recipes,
    "openssl",
    "package: openssl\nversion: v1\nsystem_requirement: \".*\"\nsystem_requirement_check: \"false\"\nsystem_requirement_missing: install openssl-devel",
    "",
  );
  write_recipe(
    &recipes,
    "root",
    "package: root\nversion: v6\nrequires:\n  - zlib\n  - openssl",
    "",
  );

  kiln_cmd()
    .args(["doctor", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Missing system requirements"))
    .stdout(predicate::str::contains("install openssl-devel"));
}

#[test]
fn doctor_json_reports_defaults() {
  let recipes = temp_recipes();

  let output = kiln_cmd()
    .args(["doctor", "root", "-a", ARCH, "-o", "json", "-c"])
    .arg(recipes.path())
    .output()
    .unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["defaults"], "release");
  assert_eq!(json["incompatible_defaults"], false);
}

// =============================================================================
// clean
// =============================================================================

/// A work directory holding one build directory no link points to.
fn stale_work_dir() -> TempDir {
  let work = TempDir::new().unwrap();
  std::fs::create_dir_all(work.path().join("BUILD/0123abcd/zlib")).unwrap();
  std::fs::create_dir_all(work.path().join("TMP")).unwrap();
  work
}

#[test]
fn clean_dry_run_keeps_files() {
  let work = stale_work_dir();

  kiln_cmd()
    .args(["clean", "-n", "-a", ARCH, "-w"])
    .arg(work.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("would delete"))
    .stdout(predicate::str::contains("0123abcd"));
  assert!(work.path().join("BUILD/0123abcd").exists());
}

#[test]
fn clean_removes_stale_build_dirs() {
  let work = stale_work_dir();

  kiln_cmd()
    .args(["clean", "-a", ARCH, "-w"])
    .arg(work.path())
    .assert()
    .success();
  assert!(!work.path().join("BUILD/0123abcd").exists());
  assert!(!work.path().join("TMP").exists());

  kiln_cmd()
    .args(["clean", "-a", ARCH, "-w"])
    .arg(work.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to delete."));
}

// =============================================================================
// build
// =============================================================================

#[cfg(unix)]
#[test]
#[serial]
fn build_then_rebuild_is_up_to_date() {
  let recipes = temp_recipes();
  let work = TempDir::new().unwrap();
  let cwd = TempDir::new().unwrap();

  kiln_cmd()
    .current_dir(cwd.path())
    .args(["build", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .arg("-w")
    .arg(work.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("root: built"))
    .stdout(predicate::str::contains("Build of root successfully completed"));
  assert!(work.path().join(ARCH).join("root/v6-local1/bin/root").exists());

  kiln_cmd()
    .current_dir(cwd.path())
    .args(["build", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .arg("-w")
    .arg(work.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("root: up to date"));
}

#[cfg(unix)]
#[test]
#[serial]
fn failing_recipe_exits_with_error() {
  let recipes = temp_recipes();
  write_recipe(&recipes, "zlib", "package: zlib\nversion: v1.3", "echo broken\nexit 3\n");
  let work = TempDir::new().unwrap();
  let cwd = TempDir::new().unwrap();

  kiln_cmd()
    .current_dir(cwd.path())
    .args(["build", "root", "-a", ARCH, "-c"])
    .arg(recipes.path())
    .arg("-w")
    .arg(work.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Error while building zlib"));
}

#[test]
fn invalid_environment_entry_fails() {
  let recipes = temp_recipes();

  kiln_cmd()
    .args(["build", "root", "-a", ARCH, "-e", "NOVALUE", "-c"])
    .arg(recipes.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("KEY=VALUE"));
}
