//! Constants shared across the crate.

/// Name of the pseudo-package every other package implicitly build-depends on.
pub const DEFAULTS_PACKAGE: &str = "defaults-release";

/// Marker written into an install directory with the hash it was built from.
pub const BUILD_HASH_MARKER: &str = ".build-hash";

/// Marker written into the build directory of a successful development build.
pub const DEVEL_SUCCESS_MARKER: &str = ".build_succeeded";

/// Line a `prefer_system_check` prints to request a named replacement spec.
pub const SYSTEM_REPLACE_MARKER: &str = "alibuild_system_replace:";

/// Visits of the same head package without progress before the build loop gives up.
pub const MAX_STALLED_ITERATIONS: usize = 20;

/// Upper bound on equivalent hashes kept per package.
pub const MAX_EQUIVALENT_HASHES: usize = 16;

/// Length of the abbreviated commit exposed as `%(short_hash)s`.
pub const SHORT_HASH_LEN: usize = 10;
