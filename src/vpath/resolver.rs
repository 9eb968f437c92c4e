//! Local upper-layer path to remote path resolution

use crate::error::{OverlaySyncError, Result};
use crate::vpath::mapping::{PathMapping, VPathTable};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Outcome of resolving one local path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Writable; changes go to this remote path
    Remote(String),
    /// Covered by a virtual or read-only entry; skip
    ReadOnly,
}

impl Resolution {
    /// Remote path, if writable
    pub fn remote_path(&self) -> Option<&str> {
        match self {
            Resolution::Remote(path) => Some(path),
            Resolution::ReadOnly => None,
        }
    }
}

/// Resolves paths inside the upper layer against a mapping table
#[derive(Debug, Clone)]
pub struct PathResolver {
    upper_root: PathBuf,
    table: Arc<VPathTable>,
}

impl PathResolver {
    /// Create a resolver for an upper root and a prebuilt table
    pub fn new(upper_root: impl Into<PathBuf>, table: Arc<VPathTable>) -> Self {
        Self {
            upper_root: upper_root.into(),
            table,
        }
    }

    /// Build the table from mappings and create a resolver
    pub fn from_mappings(upper_root: impl Into<PathBuf>, mappings: &[PathMapping]) -> Result<Self> {
        let table = VPathTable::from_mappings(mappings)?;
        Ok(Self::new(upper_root, Arc::new(table)))
    }

    /// Upper root this resolver is anchored at
    pub fn upper_root(&self) -> &Path {
        &self.upper_root
    }

    /// Mapping table
    pub fn table(&self) -> &VPathTable {
        &self.table
    }

    /// Virtual path (`/` + path relative to the upper root)
    pub fn virtual_path(&self, local: &Path) -> Result<String> {
        let rel = local.strip_prefix(&self.upper_root).map_err(|_| {
            OverlaySyncError::InvalidPath(format!(
                "'{}' is not under upper root '{}'",
                local.display(),
                self.upper_root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        OverlaySyncError::InvalidPath(format!(
                            "'{}' is not valid UTF-8",
                            local.display()
                        ))
                    })?;
                    parts.push(name);
                }
                Component::CurDir => {}
                _ => {
                    return Err(OverlaySyncError::InvalidPath(format!(
                        "'{}' has an unsupported component",
                        local.display()
                    )));
                }
            }
        }

        Ok(format!("/{}", parts.join("/")))
    }

    /// Resolve a local path inside the upper root
    pub fn resolve(&self, local: &Path) -> Result<Resolution> {
        let vpath = self.virtual_path(local)?;
        let entry = self
            .table
            .closest_entry(&vpath)
            .ok_or_else(|| OverlaySyncError::NoMappingFound(vpath.clone()))?;

        if entry.is_read_only() {
            tracing::debug!("'{}' is read-only under '{}'", vpath, entry.mapping_path());
            return Ok(Resolution::ReadOnly);
        }

        entry.remote_path_for(&vpath).map(Resolution::Remote)
    }
}
