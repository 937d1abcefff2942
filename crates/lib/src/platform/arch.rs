/// CPU architecture variants with a known tag spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  /// Map a processor name as reported by the system.
  pub fn from_processor(processor: &str) -> Option<Self> {
    match processor {
      "x86_64" | "amd64" => Some(Self::X86_64),
      "aarch64" | "arm64" => Some(Self::Aarch64),
      _ => None,
    }
  }

  /// Spelling used in macOS architecture tags.
  pub fn darwin_tag(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86-64",
      Self::Aarch64 => "arm64",
    }
  }
}
