//! Host platform selection.
//!
//! The platform decides where the encoder and prober are looked up and which
//! `-hwaccel` tag is emitted when hardware acceleration is requested.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{MediavisorError, Result};

const LINUX_ENCODER: &[&str] = &["ffmpeg"];
const LINUX_PROBER: &[&str] = &["ffprobe"];

const DARWIN_ENCODER: &[&str] = &[
    "/opt/homebrew/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/usr/bin/ffmpeg",
    "ffmpeg",
];
const DARWIN_PROBER: &[&str] = &[
    "/opt/homebrew/bin/ffprobe",
    "/usr/local/bin/ffprobe",
    "/usr/bin/ffprobe",
    "ffprobe",
];

const WINDOWS_ENCODER: &[&str] = &["ffmpeg.exe"];
const WINDOWS_PROBER: &[&str] = &["ffprobe.exe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin { arm64: bool },
    /// Reserved: every operation fails with `unsupported-platform`.
    Windows,
}

impl Platform {
    /// Select the platform for the running host.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Select a platform from an OS/arch pair as reported by `std::env::consts`.
    pub fn from_os(os: &str, arch: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::Darwin {
                arm64: arch == "aarch64",
            }),
            "windows" => Ok(Platform::Windows),
            other => Err(MediavisorError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn os_tag(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Darwin { .. } => "darwin",
            Platform::Windows => "windows",
        }
    }

    /// Tag passed to `-hwaccel` when acceleration is requested.
    pub fn hwaccel_tag(&self) -> &'static str {
        match self {
            Platform::Darwin { arm64: true } => "videotoolbox",
            _ => "auto",
        }
    }

    pub fn encoder_candidates(&self) -> &'static [&'static str] {
        match self {
            Platform::Linux => LINUX_ENCODER,
            Platform::Darwin { .. } => DARWIN_ENCODER,
            Platform::Windows => WINDOWS_ENCODER,
        }
    }

    pub fn prober_candidates(&self) -> &'static [&'static str] {
        match self {
            Platform::Linux => LINUX_PROBER,
            Platform::Darwin { .. } => DARWIN_PROBER,
            Platform::Windows => WINDOWS_PROBER,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Platform::Windows)
    }

    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(MediavisorError::UnsupportedPlatform(
                self.os_tag().to_string(),
            ))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.os_tag())
    }
}

/// Resolve the first usable candidate.
///
/// Absolute candidates must exist on disk; bare names are searched in `PATH`.
/// When nothing resolves, the last candidate is returned as-is so the spawn
/// error names the binary the caller expected.
pub(crate) fn locate(candidates: &[&str]) -> PathBuf {
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_absolute() {
            if path.exists() {
                debug!("Found {} on disk", path.display());
                return path.to_path_buf();
            }
        } else if let Ok(found) = which::which(candidate) {
            debug!("Resolved {} to {}", candidate, found.display());
            return found;
        }
    }

    PathBuf::from(candidates.last().copied().unwrap_or_default())
}
