//! Bringing packages up to date.
//!
//! Once the build order is known and every spec is prepared, the loop in
//! [`reconcile`] decides per package whether an existing build can be reused,
//! unpacked from a cached tarball or has to be compiled.
//!
//! # Submodules
//!
//! - [`reconcile`] - The build loop and revision assignment
//! - [`execute`] - Running a single build with bash
//! - [`environment`] - Build environment and generated `init.sh` files
//! - [`provenance`] - `.meta/provenance.json` of installed packages

pub mod environment;
pub mod execute;
pub mod provenance;
pub mod reconcile;
mod types;

pub use execute::{BuildExecutor, ExecuteError, ShellExecutor};
pub use reconcile::run;
pub use types::*;
