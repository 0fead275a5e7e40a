//! Platform tags used to key bottles

use std::{fmt, process::Command, str::FromStr};

use crate::{Error, Result};

/// Known macOS releases, newest first: (codename, major, minor)
pub const MACOS_RELEASES: [(&str, u32, u32); 8] = [
    ("tahoe", 26, 0),
    ("sequoia", 15, 0),
    ("sonoma", 14, 0),
    ("ventura", 13, 0),
    ("monterey", 12, 0),
    ("big_sur", 11, 0),
    ("catalina", 10, 15),
    ("mojave", 10, 14),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Arm64,
    X86_64,
}

impl Arch {
    pub fn current() -> Option<Self> {
        if cfg!(target_arch = "aarch64") {
            Some(Arch::Arm64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else {
            None
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacOsRelease {
    pub codename: &'static str,
    pub version: (u32, u32),
}

impl MacOsRelease {
    pub fn from_codename(codename: &str) -> Option<Self> {
        MACOS_RELEASES
            .iter()
            .find(|(name, _, _)| *name == codename)
            .map(|&(codename, major, minor)| MacOsRelease {
                codename,
                version: (major, minor),
            })
    }

    /// Map a `sw_vers -productVersion` string such as `15.1.2` or `10.15.7`
    pub fn from_version(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);

        MACOS_RELEASES
            .iter()
            .find(|&&(_, m, n)| if major >= 11 { m == major } else { m == major && n == minor })
            .map(|&(codename, major, minor)| MacOsRelease {
                codename,
                version: (major, minor),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs(MacOsRelease),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub arch: Arch,
    pub os: Os,
}

impl Platform {
    pub fn new(arch: Arch, os: Os) -> Self {
        Self { arch, os }
    }

    /// Detect the platform this process runs on.
    ///
    /// On macOS the release is read from `sw_vers`; unsupported targets yield `None`.
    pub fn detect() -> Option<Self> {
        let arch = Arch::current()?;
        let os = if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            let output = Command::new("sw_vers")
                .arg("-productVersion")
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            let version = String::from_utf8_lossy(&output.stdout);
            Os::MacOs(MacOsRelease::from_version(&version)?)
        } else {
            return None;
        };
        Some(Platform { arch, os })
    }

    /// Bottle tag: `arm64_sonoma`, `sonoma` (Intel macOS), `x86_64_linux`, `arm64_linux`
    pub fn tag(&self) -> String {
        match (self.arch, self.os) {
            (arch, Os::Linux) => format!("{}_linux", arch),
            (Arch::Arm64, Os::MacOs(release)) => format!("arm64_{}", release.codename),
            (Arch::X86_64, Os::MacOs(release)) => release.codename.to_string(),
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        let unknown = || Error::UnknownTag(tag.to_string());

        if let Some(arch) = tag.strip_suffix("_linux") {
            let arch = match arch {
                "arm64" => Arch::Arm64,
                "x86_64" => Arch::X86_64,
                _ => return Err(unknown()),
            };
            return Ok(Platform::new(arch, Os::Linux));
        }

        let (arch, codename) = match tag.strip_prefix("arm64_") {
            Some(codename) => (Arch::Arm64, codename),
            None => (Arch::X86_64, tag),
        };
        let release = MacOsRelease::from_codename(codename).ok_or_else(unknown)?;
        Ok(Platform::new(arch, Os::MacOs(release)))
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Platform::from_tag(s)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}
