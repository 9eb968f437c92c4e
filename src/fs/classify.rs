//! Upper-layer entry classification
//!
//! Decides what each entry found in an overlay upper layer means for the
//! remote side: a directory to merge, an opaque directory that replaces the
//! remote one, a file to upload, a whiteout to delete, or bookkeeping to skip.

use crate::error::{OverlaySyncError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::FileType;
use std::path::Path;

/// Extended attributes that mark a directory opaque
pub const OPAQUE_XATTRS: &[&str] = &[
    "trusted.overlay.opaque",
    "user.overlay.opaque",
    "user.fuseoverlayfs.opaque",
];

/// Prefix of overlay whiteout bookkeeping files
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Suffix of opaque-directory bookkeeping files
pub const OPAQUE_SUFFIX: &str = ".opq";

/// What to do with one upper-layer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Ensure the remote directory exists, keep its contents
    MergeDir,
    /// Ensure the remote directory exists, clear its contents
    ReplaceDir,
    /// Upload the local file over the remote path
    UploadFile,
    /// The entry was deleted in the overlay; delete it remotely
    DeleteRemote,
    /// Skip
    Ignored,
}

impl Disposition {
    /// Short label used in logs and the status log
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::MergeDir | Disposition::ReplaceDir => "dir",
            Disposition::UploadFile => "file",
            Disposition::DeleteRemote => "whiteout",
            Disposition::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::MergeDir => "merge-dir",
            Disposition::ReplaceDir => "replace-dir",
            Disposition::UploadFile => "upload-file",
            Disposition::DeleteRemote => "delete-remote",
            Disposition::Ignored => "ignored",
        };
        write!(f, "{}", s)
    }
}

/// File kinds the classifier distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory
    Directory,
    /// Character device, the overlay whiteout marker
    CharDevice,
    /// FIFO, socket or block device; has no content to upload
    Special,
    /// Regular file or symlink
    Other,
}

impl EntryKind {
    /// Kind of a file type as reported by `symlink_metadata`/walkdir
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_dir() {
            return EntryKind::Directory;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_char_device() {
                return EntryKind::CharDevice;
            }
            if file_type.is_fifo() || file_type.is_socket() || file_type.is_block_device() {
                return EntryKind::Special;
            }
        }

        EntryKind::Other
    }
}

/// Check if a file name is overlay bookkeeping (`.wh.*.opq`)
pub fn is_bookkeeping_name(name: &str) -> bool {
    name.starts_with(WHITEOUT_PREFIX) && name.ends_with(OPAQUE_SUFFIX)
}

/// Check if an opaque attribute value means "opaque"
pub fn is_opaque_value(value: &[u8]) -> bool {
    value.eq_ignore_ascii_case(b"y")
}

/// Check if a directory carries an opaque marker
#[cfg(unix)]
pub fn is_opaque_dir(path: &Path) -> bool {
    OPAQUE_XATTRS.iter().any(|attr| match xattr::get(path, attr) {
        Ok(Some(value)) => is_opaque_value(&value),
        Ok(None) => false,
        Err(e) => {
            tracing::trace!("Cannot read {} on {}: {}", attr, path.display(), e);
            false
        }
    })
}

/// Check if a directory carries an opaque marker
#[cfg(not(unix))]
pub fn is_opaque_dir(_path: &Path) -> bool {
    false
}

/// Entry classifier with optional exclude patterns
#[derive(Debug, Clone)]
pub struct Classifier {
    exclude_matcher: GlobSet,
}

impl Classifier {
    /// Create a classifier; patterns match paths relative to the upper root
    pub fn new(exclude_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            exclude_matcher: Self::build_globset(exclude_patterns)?,
        })
    }

    /// Build a GlobSet from patterns
    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                OverlaySyncError::ConfigError(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| OverlaySyncError::ConfigError(format!("Failed to build glob set: {}", e)))
    }

    /// Classify an entry from its kind, name and opaque marker
    pub fn classify_parts(&self, kind: EntryKind, name: &str, opaque: bool) -> Disposition {
        if is_bookkeeping_name(name) {
            return Disposition::Ignored;
        }

        match kind {
            EntryKind::Directory if opaque => Disposition::ReplaceDir,
            EntryKind::Directory => Disposition::MergeDir,
            EntryKind::CharDevice => Disposition::DeleteRemote,
            EntryKind::Special => Disposition::Ignored,
            EntryKind::Other => Disposition::UploadFile,
        }
    }

    /// Classify an upper-layer entry
    ///
    /// `relative` is the path below the upper root, used for exclude matching.
    pub fn classify(&self, path: &Path, relative: &Path, file_type: FileType) -> Disposition {
        if !self.exclude_matcher.is_empty() && self.exclude_matcher.is_match(relative) {
            return Disposition::Ignored;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        let kind = EntryKind::from_file_type(file_type);
        if kind == EntryKind::Special {
            tracing::warn!("Skipping special file {}", path.display());
        }
        let opaque = kind == EntryKind::Directory && is_opaque_dir(path);

        self.classify_parts(kind, &name, opaque)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            exclude_matcher: GlobSet::empty(),
        }
    }
}
