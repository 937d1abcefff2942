//! kiln-lib: Core types and logic for kiln
//!
//! This crate turns a directory of package recipes into installed builds:
//! - `recipe` / `defaults`: reading recipes and the defaults that override them
//! - `resolve` / `schedule` / `plan`: the dependency table and its build order
//! - `doctor`: whether this host can provide what a set of packages needs
//! - `prepare` / `hash`: source-control state and content hashes of build inputs
//! - `build`: the loop that reuses, unpacks or compiles each package
//! - `store` / `sync`: the work directory layout, its cleanup and the shared remote store

pub mod build;
pub mod consts;
pub mod defaults;
pub mod doctor;
pub mod graph;
pub mod hash;
pub mod plan;
pub mod platform;
pub mod prepare;
pub mod recipe;
pub mod resolve;
pub mod schedule;
pub mod scm;
pub mod spec;
pub mod store;
pub mod sync;
pub mod util;
