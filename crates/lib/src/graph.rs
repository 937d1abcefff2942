//! Graphviz rendering of a resolved spec table.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::consts::DEFAULTS_PACKAGE;
use crate::spec::SpecArena;

const BOTH_COLOR: &str = "tomato1";
const RUNTIME_COLOR: &str = "greenyellow";
const BUILD_COLOR: &str = "plum";
const ROOT_COLOR: &str = "gold";
const BUILD_EDGE_COLOR: &str = "grey70";
const RUNTIME_EDGE_COLOR: &str = "dodgerblue3";

/// Render `specs` as a DOT digraph.
///
/// Nodes are colored by how other packages depend on them: as both a build
/// and a runtime dependency, runtime only, build only, or not at all (the
/// requested `root`). The defaults pseudo-package is left out.
pub fn render_dot(specs: &SpecArena, root: &str) -> String {
  let visible = |name: &&String| name.as_str() != DEFAULTS_PACKAGE;

  let mut all_build = BTreeSet::new();
  let mut all_runtime = BTreeSet::new();
  for spec in specs.iter() {
    all_build.extend(spec.build_requires.iter().filter(visible).map(String::as_str));
    all_runtime.extend(spec.runtime_requires.iter().filter(visible).map(String::as_str));
  }

  let mut dot = String::from("digraph {\n");
  for spec in specs.iter().filter(|s| s.package != DEFAULTS_PACKAGE) {
    let name = spec.package.as_str();
    let in_build = all_build.contains(name);
    let in_runtime = all_runtime.contains(name);
    let color = match (in_build, in_runtime) {
      (true, true) => BOTH_COLOR,
      (false, true) => RUNTIME_COLOR,
      (true, false) => BUILD_COLOR,
      (false, false) if name == root => ROOT_COLOR,
      (false, false) => "white",
    };

    let _ = writeln!(
      dot,
      "\"{name}\" [shape=box, style=\"rounded,filled\", fontname=\"helvetica\", fillcolor={color}]"
    );
    for dep in spec.build_requires.iter().filter(visible) {
      let _ = writeln!(dot, "\"{name}\" -> \"{dep}\" [color={BUILD_EDGE_COLOR}]");
    }
    for dep in spec.runtime_requires.iter().filter(visible) {
      let _ = writeln!(dot, "\"{name}\" -> \"{dep}\" [color={RUNTIME_EDGE_COLOR}]");
    }
  }
  dot.push_str("}\n");
  dot
}
