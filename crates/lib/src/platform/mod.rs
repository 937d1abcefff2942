//! Architecture tag detection.
//!
//! Built artifacts are namespaced by an architecture tag such as
//! `ubuntu2204_x86-64` or `osx_arm64`, combining the distribution, its
//! major version and the CPU.

pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;

const OS_RELEASE: &str = "/etc/os-release";

/// The distribution fields of an `os-release` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
  pub id: String,
  pub version_id: String,
}

impl OsRelease {
  /// Parse `KEY=value` lines, ignoring everything but `ID` and `VERSION_ID`.
  pub fn parse(text: &str) -> Self {
    let mut release = OsRelease::default();
    for line in text.lines() {
      let Some((key, value)) = line.split_once('=') else {
        continue;
      };
      let value = value.trim().trim_matches('"').to_string();
      match key.trim() {
        "ID" => release.id = value,
        "VERSION_ID" => release.version_id = value,
        _ => {}
      }
    }
    release
  }
}

/// Compute the architecture tag for a host.
pub fn detect_architecture(os: Os, release: &OsRelease, processor: &str) -> String {
  if os == Os::MacOs {
    let cpu = Arch::from_processor(processor).map_or(processor, |a| a.darwin_tag());
    return format!("osx_{cpu}");
  }

  let id = release.id.to_lowercase();
  let major = release.version_id.split('.').next().unwrap_or("");
  let distribution = match id.as_str() {
    "ubuntu" => format!("ubuntu{}", release.version_id.replace('.', "")),
    "redhat" | "rhel" | "centos" | "almalinux" | "rocky" => format!("slc{major}"),
    "debian" if major == "7" => "ubuntu1204".to_string(),
    "debian" if major == "8" => "ubuntu1404".to_string(),
    _ => format!("{id}{major}"),
  };
  format!("{distribution}_{}", processor.replace('_', "-"))
}

/// The architecture tag of the running host, or `None` on unsupported systems.
pub fn current_architecture() -> Option<String> {
  let os = Os::current()?;
  let release = match os {
    Os::MacOs => OsRelease::default(),
    Os::Linux => OsRelease::parse(&std::fs::read_to_string(OS_RELEASE).ok()?),
  };
  Some(detect_architecture(os, &release, std::env::consts::ARCH))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn release(id: &str, version: &str) -> OsRelease {
    OsRelease {
      id: id.to_string(),
      version_id: version.to_string(),
    }
  }

  #[test]
  fn parses_os_release() {
    let text = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n# comment\n";
    assert_eq!(OsRelease::parse(text), release("ubuntu", "22.04"));
  }

  #[test]
  fn macos_tags() {
    assert_eq!(detect_architecture(Os::MacOs, &OsRelease::default(), "arm64"), "osx_arm64");
    assert_eq!(detect_architecture(Os::MacOs, &OsRelease::default(), "x86_64"), "osx_x86-64");
  }

  #[test]
  fn linux_tags() {
    assert_eq!(
      detect_architecture(Os::Linux, &release("ubuntu", "22.04"), "x86_64"),
      "ubuntu2204_x86-64"
    );
    assert_eq!(detect_architecture(Os::Linux, &release("centos", "7"), "x86_64"), "slc7_x86-64");
    assert_eq!(
      detect_architecture(Os::Linux, &release("rhel", "9.2"), "aarch64"),
      "slc9_aarch64"
    );
    assert_eq!(
      detect_architecture(Os::Linux, &release("debian", "8"), "x86_64"),
      "ubuntu1404_x86-64"
    );
    assert_eq!(
      detect_architecture(Os::Linux, &release("fedora", "39"), "x86_64"),
      "fedora39_x86-64"
    );
  }
}
