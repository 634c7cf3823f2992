//! Platform.
//!
//! This module contains the operating system and architecture a java package is built for.

use std::env;
use std::fmt;

/// Enumeration of supported operating systems.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Os {
    /// Linux
    Linux,
    /// macOS
    Darwin,
    /// Windows
    Windows,
}

impl Os {
    /// Returns the id of the operating system (as used in cache paths).
    pub(crate) fn id(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl TryFrom<&str> for Os {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "linux" => Ok(Self::Linux),
            "darwin" | "macos" | "mac" | "osx" => Ok(Self::Darwin),
            "windows" | "win" => Ok(Self::Windows),
            _ => Err(format!("unsupported operating system '{value}'")),
        }
    }
}

/// Enumeration of supported architectures.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Arch {
    /// 64-bit x86
    X86_64,
    /// 64-bit ARM
    Arm64,
}

impl Arch {
    /// Returns the id of the architecture (as used in cache paths).
    pub(crate) fn id(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

impl TryFrom<&str> for Arch {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            _ => Err(format!("unsupported architecture '{value}'")),
        }
    }
}

/// The platform (operating system and architecture) of a java package.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct Platform {
    pub(crate) os: Os,
    pub(crate) arch: Arch,
}

impl Platform {
    /// Creates a new `Platform`.
    pub(crate) const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detects the platform this program is running on.
    pub(crate) fn current() -> Result<Self, String> {
        let os = Os::try_from(env::consts::OS)?;
        let arch = Arch::try_from(env::consts::ARCH)?;

        Ok(Self { os, arch })
    }

    /// Returns the name of the java executable on this platform.
    pub(crate) fn java_exe(self) -> &'static str {
        match self.os {
            Os::Windows => "java.exe",
            _ => "java",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.id(), self.arch.id())
    }
}
