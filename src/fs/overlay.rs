//! Overlay staging layout
//!
//! Each volume stages its overlay mount under
//! `<storage>/<client>/<volume>-overlayfs-{lower,upper,workdir}`.

use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Overlay implementation used for the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverlayDriverType {
    /// Kernel built-in overlay
    #[default]
    #[serde(rename = "overlay")]
    Overlay,
    /// fuse-overlayfs
    #[serde(rename = "fuse-overlayfs")]
    FuseOverlayFs,
}

impl OverlayDriverType {
    /// Parse a driver name; unknown names fall back to the kernel driver
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "fuse-overlayfs" => Self::FuseOverlayFs,
            _ => Self::Overlay,
        }
    }

    /// Driver name as used in mount options
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overlay => "overlay",
            Self::FuseOverlayFs => "fuse-overlayfs",
        }
    }

    /// Check if the driver can be used on this host
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Overlay => crate::fs::is_overlay_driver_supported(),
            Self::FuseOverlayFs => true,
        }
    }
}

impl fmt::Display for OverlayDriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staging paths of one volume's overlay mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayLayout {
    /// Volume id
    pub volume_id: String,
    /// Read-only lower layer mount point
    pub lower: PathBuf,
    /// Writable upper layer
    pub upper: PathBuf,
    /// Overlay work directory
    pub workdir: PathBuf,
}

impl OverlayLayout {
    /// Derive the layout for a volume
    pub fn new(storage_path: &Path, client_type: &str, volume_id: &str) -> Self {
        let base = storage_path.join(client_type);
        Self {
            volume_id: volume_id.to_string(),
            lower: base.join(format!("{}-overlayfs-lower", volume_id)),
            upper: base.join(format!("{}-overlayfs-upper", volume_id)),
            workdir: base.join(format!("{}-overlayfs-workdir", volume_id)),
        }
    }

    /// Create the lower, upper and work directories
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.lower, &self.upper, &self.workdir] {
            std::fs::create_dir_all(dir).with_path(dir)?;
        }
        Ok(())
    }

    /// Delete the work directory
    pub fn delete_workdir(&self) -> Result<()> {
        remove_tree(&self.workdir)
    }

    /// Delete the upper layer
    pub fn delete_upper(&self) -> Result<()> {
        remove_tree(&self.upper)
    }

    /// Delete the lower mount point
    ///
    /// Only an empty directory is removed. A remote tree still mounted there
    /// makes this fail instead of wiping the remote data.
    pub fn delete_lower(&self) -> Result<()> {
        match std::fs::remove_dir(&self.lower) {
            Ok(()) => {
                tracing::debug!("Deleted {}", self.lower.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_path(&self.lower),
        }
    }
}

/// Remove a directory tree; a missing tree is fine
fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_path(path),
    }
}

/// Check if a directory has no entries
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path).with_path(path)?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = OverlayLayout::new(Path::new("/var/lib/sync"), "webdav", "vol-1");
        assert_eq!(layout.lower, PathBuf::from("/var/lib/sync/webdav/vol-1-overlayfs-lower"));
        assert_eq!(layout.upper, PathBuf::from("/var/lib/sync/webdav/vol-1-overlayfs-upper"));
        assert_eq!(layout.workdir, PathBuf::from("/var/lib/sync/webdav/vol-1-overlayfs-workdir"));
    }

    #[test]
    fn test_create_and_delete() {
        let dir = TempDir::new().unwrap();
        let layout = OverlayLayout::new(dir.path(), "local", "v");
        layout.create_dirs().unwrap();
        assert!(layout.upper.is_dir());
        assert!(is_dir_empty(&layout.upper).unwrap());

        std::fs::write(layout.upper.join("f"), b"x").unwrap();
        assert!(!is_dir_empty(&layout.upper).unwrap());

        layout.delete_workdir().unwrap();
        layout.delete_upper().unwrap();
        assert!(!layout.workdir.exists());
        assert!(!layout.upper.exists());
        assert!(layout.lower.exists());

        // idempotent
        layout.delete_upper().unwrap();
    }

    #[test]
    fn test_delete_lower_keeps_mounted_contents() {
        let dir = TempDir::new().unwrap();
        let layout = OverlayLayout::new(dir.path(), "local", "v");
        layout.create_dirs().unwrap();
        std::fs::write(layout.lower.join("remote_data.bin"), b"remote").unwrap();

        assert!(layout.delete_lower().is_err());
        assert_eq!(std::fs::read(layout.lower.join("remote_data.bin")).unwrap(), b"remote");

        std::fs::remove_file(layout.lower.join("remote_data.bin")).unwrap();
        layout.delete_lower().unwrap();
        assert!(!layout.lower.exists());
        layout.delete_lower().unwrap();
    }

    #[test]
    fn test_driver_type() {
        assert_eq!(OverlayDriverType::from_name("FUSE-OVERLAYFS"), OverlayDriverType::FuseOverlayFs);
        assert_eq!(OverlayDriverType::from_name("overlay"), OverlayDriverType::Overlay);
        assert_eq!(OverlayDriverType::from_name("aufs"), OverlayDriverType::Overlay);
        assert_eq!(OverlayDriverType::default().to_string(), "overlay");
        assert!(OverlayDriverType::FuseOverlayFs.is_supported());
    }
}
