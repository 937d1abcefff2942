//! Hashing utilities for build identity.
//!
//! This module provides:
//! - `Hasher`: an incremental SHA-256 digest that can be forked with `clone()`
//! - `hash_bytes()`: one-shot hashing of arbitrary bytes

use sha2::{Digest, Sha256};

/// Incremental SHA-256 digest producing lowercase hex.
///
/// Cloning a `Hasher` forks its state, so a common prefix of inputs can be
/// hashed once and then extended along several alternatives.
#[derive(Debug, Clone, Default)]
pub struct Hasher(Sha256);

impl Hasher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed more input into the digest.
  pub fn update(&mut self, data: impl AsRef<[u8]>) {
    self.0.update(data.as_ref());
  }

  /// The hex digest of everything fed so far. The hasher stays usable.
  pub fn hexdigest(&self) -> String {
    hex::encode(self.0.clone().finalize())
  }
}

/// Hash arbitrary bytes, returning the full 64-character hex digest.
pub fn hash_bytes(data: impl AsRef<[u8]>) -> String {
  let mut hasher = Hasher::new();
  hasher.update(data);
  hasher.hexdigest()
}
