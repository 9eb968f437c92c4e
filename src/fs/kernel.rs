//! Kernel version detection for overlay driver support

use crate::error::{OverlaySyncError, Result};
use std::fmt;

/// Oldest kernel whose overlay driver handles the sync workflow
pub const MIN_OVERLAY_KERNEL: KernelInfo = KernelInfo {
    major: 5,
    minor: 15,
    patch: 0,
};

/// Kernel release version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelInfo {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch level
    pub patch: u32,
}

impl KernelInfo {
    /// Parse a release string such as `6.8.0-45-generic`
    pub fn parse(release: &str) -> Result<Self> {
        let release = release.trim();
        let version = release.split('-').next().unwrap_or_default();

        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() != 3 {
            return Err(OverlaySyncError::config(format!(
                "kernel version '{}' doesn't have 3 parts",
                version
            )));
        }

        let number = |part: &str| -> Result<u32> {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().map_err(|_| {
                OverlaySyncError::config(format!("invalid kernel version component '{}'", part))
            })
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }

    /// Version of the running kernel
    #[cfg(unix)]
    pub fn current() -> Result<Self> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| OverlaySyncError::config(format!("uname failed: {}", e)))?;
        Self::parse(&uts.release().to_string_lossy())
    }

    /// Version of the running kernel
    #[cfg(not(unix))]
    pub fn current() -> Result<Self> {
        Err(OverlaySyncError::config("kernel version is only available on unix"))
    }

    /// Check if this version is at least `major.minor.patch`
    pub fn has_higher_kernel_version_than(&self, major: u32, minor: u32, patch: u32) -> bool {
        *self >= KernelInfo { major, minor, patch }
    }
}

impl fmt::Display for KernelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Check if the running kernel supports the kernel overlay driver
pub fn is_overlay_driver_supported() -> bool {
    match KernelInfo::current() {
        Ok(info) => {
            let supported = info >= MIN_OVERLAY_KERNEL;
            tracing::debug!("Kernel {} overlay support: {}", info, supported);
            supported
        }
        Err(e) => {
            tracing::error!("Failed to get kernel info: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        let info = KernelInfo::parse("6.8.0-45-generic\n").unwrap();
        assert_eq!(info, KernelInfo { major: 6, minor: 8, patch: 0 });

        let info = KernelInfo::parse("5.15.167+").unwrap();
        assert_eq!(info.patch, 167);

        assert!(KernelInfo::parse("6.8").is_err());
        assert!(KernelInfo::parse("a.b.c").is_err());
        assert!(KernelInfo::parse("").is_err());
    }

    #[test]
    fn test_version_comparison() {
        let info = KernelInfo::parse("5.15.0").unwrap();
        assert!(info.has_higher_kernel_version_than(5, 15, 0));
        assert!(info.has_higher_kernel_version_than(5, 4, 200));
        assert!(!info.has_higher_kernel_version_than(5, 15, 1));
        assert!(!info.has_higher_kernel_version_than(6, 0, 0));

        let old = KernelInfo::parse("5.4.0-150-generic").unwrap();
        assert!(old < MIN_OVERLAY_KERNEL);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_kernel() {
        let info = KernelInfo::current().unwrap();
        assert!(info.major >= 2);
    }
}
