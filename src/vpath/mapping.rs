//! Virtual path mapping table
//!
//! Translates paths of the virtual (mounted) namespace into absolute remote
//! paths. Every ancestor of a mapped path that is not itself mapped becomes a
//! virtual read-only directory, so the root `/` is always covered.

use crate::error::{OverlaySyncError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of remote resource a mapping points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A remote directory; everything below the mapping path maps below it
    #[default]
    Dir,
    /// A single remote file; only the mapping path itself resolves
    File,
}

/// One user-supplied mapping rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    /// Absolute remote path
    #[serde(alias = "irods_path")]
    pub remote_path: String,
    /// Absolute path in the virtual namespace
    pub mapping_path: String,
    /// Resource type
    #[serde(default)]
    pub resource_type: ResourceType,
    /// Never write back through this mapping
    #[serde(default)]
    pub read_only: bool,
}

impl PathMapping {
    /// Map a whole remote collection at the virtual root
    pub fn root(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            mapping_path: "/".to_string(),
            resource_type: ResourceType::Dir,
            read_only: false,
        }
    }

    /// Parse a JSON array of mappings
    pub fn parse_json(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What a table entry stands for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VPathKind {
    /// Synthesized ancestor of a mapping; read-only
    Virtual,
    /// Backed by a remote path
    Remote {
        /// Remote path the entry maps to
        remote_path: String,
        /// Whether the remote side is a collection or a single object
        resource_type: ResourceType,
        /// Changes below this entry are not synced
        read_only: bool,
    },
}

/// A single entry of the mapping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VPathEntry {
    mapping_path: String,
    kind: VPathKind,
}

impl VPathEntry {
    /// Virtual path prefix of this entry
    pub fn mapping_path(&self) -> &str {
        &self.mapping_path
    }

    /// Entry kind
    pub fn kind(&self) -> &VPathKind {
        &self.kind
    }

    /// Whether changes under this entry must not be written back
    pub fn is_read_only(&self) -> bool {
        match &self.kind {
            VPathKind::Virtual => true,
            VPathKind::Remote { read_only, .. } => *read_only,
        }
    }

    /// Compute the remote path for a virtual path covered by this entry
    pub fn remote_path_for(&self, vpath: &str) -> Result<String> {
        let VPathKind::Remote {
            remote_path,
            resource_type,
            ..
        } = &self.kind
        else {
            return Err(OverlaySyncError::NoMappingFound(vpath.to_string()));
        };

        let rel = relative_to(vpath, &self.mapping_path)
            .ok_or_else(|| OverlaySyncError::NoMappingFound(vpath.to_string()))?;

        match resource_type {
            ResourceType::File if !rel.is_empty() => {
                Err(OverlaySyncError::NoMappingFound(vpath.to_string()))
            }
            _ => Ok(join_remote(remote_path, rel)),
        }
    }
}

/// Immutable lookup table built from a list of mappings
#[derive(Debug, Clone)]
pub struct VPathTable {
    entries: BTreeMap<String, VPathEntry>,
}

impl VPathTable {
    /// Build and validate a table
    pub fn from_mappings(mappings: &[PathMapping]) -> Result<Self> {
        if mappings.is_empty() {
            return Err(OverlaySyncError::InvalidMapping(
                "no path mappings given".to_string(),
            ));
        }

        let mut entries = BTreeMap::new();
        for mapping in mappings {
            let mapping_path = normalize_absolute(&mapping.mapping_path)?;
            let remote_path = normalize_absolute(&mapping.remote_path)?;

            let entry = VPathEntry {
                mapping_path: mapping_path.clone(),
                kind: VPathKind::Remote {
                    remote_path,
                    resource_type: mapping.resource_type,
                    read_only: mapping.read_only,
                },
            };
            if entries.insert(mapping_path.clone(), entry).is_some() {
                return Err(OverlaySyncError::InvalidMapping(format!(
                    "duplicate mapping path '{}'",
                    mapping_path
                )));
            }
        }

        let mapped: Vec<String> = entries.keys().cloned().collect();
        for mapping_path in &mapped {
            for ancestor in ancestors(mapping_path).skip(1) {
                match entries.get(ancestor).map(VPathEntry::kind) {
                    Some(VPathKind::Remote {
                        resource_type: ResourceType::File,
                        ..
                    }) => {
                        return Err(OverlaySyncError::InvalidMapping(format!(
                            "mapping '{}' is nested under file mapping '{}'",
                            mapping_path, ancestor
                        )));
                    }
                    Some(_) => {}
                    None => {
                        entries.insert(
                            ancestor.to_string(),
                            VPathEntry {
                                mapping_path: ancestor.to_string(),
                                kind: VPathKind::Virtual,
                            },
                        );
                    }
                }
            }
        }

        Ok(Self { entries })
    }

    /// Find the longest-prefix entry covering a virtual path
    pub fn closest_entry(&self, vpath: &str) -> Option<&VPathEntry> {
        ancestors(vpath).find_map(|prefix| self.entries.get(prefix))
    }

    /// Number of entries, synthesized ancestors included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order
    pub fn entries(&self) -> impl Iterator<Item = &VPathEntry> {
        self.entries.values()
    }
}

/// Normalize an absolute slash-separated path: collapse `//` and `.`,
/// strip trailing slashes, reject `..`
pub fn normalize_absolute(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(OverlaySyncError::InvalidMapping(format!(
            "path '{}' must be absolute",
            path
        )));
    }

    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(OverlaySyncError::InvalidMapping(format!(
                    "path '{}' must not contain '..'",
                    path
                )));
            }
            other => parts.push(other),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Join a remote base path with a relative remainder
pub fn join_remote(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{base}{rel}")
    } else {
        format!("{base}/{rel}")
    }
}

/// Parent of a normalized remote path (`/` for top-level entries)
pub fn remote_parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Remainder of `path` below `base`, or None if `path` is not under it
fn relative_to<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base == "/" {
        return path.strip_prefix('/');
    }
    if path == base {
        return Some("");
    }
    path.strip_prefix(base).and_then(|rest| rest.strip_prefix('/'))
}

/// `path` itself, then each ancestor up to and including `/`
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |p| remote_parent(p))
}
