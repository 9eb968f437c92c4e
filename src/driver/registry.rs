//! Staged volume registry

use crate::fs::{OverlayDriverType, OverlayLayout};
use crate::vpath::PathMapping;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// What the driver knows about one staged volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume id
    pub volume_id: String,
    /// Overlay staging paths
    pub layout: OverlayLayout,
    /// Path mappings the volume was mounted with
    pub mappings: Vec<PathMapping>,
    /// Overlay driver in use
    pub driver: OverlayDriverType,
    /// Registration time
    pub registered_at: DateTime<Utc>,
}

/// In-memory volume store owned by the node driver
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: RwLock<HashMap<String, VolumeInfo>>,
}

impl VolumeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume, returning the entry it replaced
    pub fn register(&self, info: VolumeInfo) -> Option<VolumeInfo> {
        let mut volumes = self.volumes.write().unwrap_or_else(PoisonError::into_inner);
        let previous = volumes.insert(info.volume_id.clone(), info);
        if let Some(prev) = &previous {
            tracing::warn!("Volume {} was already registered, replacing it", prev.volume_id);
        }
        previous
    }

    /// Look up a volume
    pub fn get(&self, volume_id: &str) -> Option<VolumeInfo> {
        self.volumes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(volume_id)
            .cloned()
    }

    /// Remove a volume
    pub fn remove(&self, volume_id: &str) -> Option<VolumeInfo> {
        self.volumes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(volume_id)
    }

    /// Registered volume ids, sorted
    pub fn volume_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .volumes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered volumes
    pub fn len(&self) -> usize {
        self.volumes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if no volume is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn info(id: &str) -> VolumeInfo {
        VolumeInfo {
            volume_id: id.to_string(),
            layout: OverlayLayout::new(Path::new("/storage"), "local", id),
            mappings: vec![PathMapping::root("/zone")],
            driver: OverlayDriverType::Overlay,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = VolumeRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register(info("b")).is_none());
        assert!(registry.register(info("a")).is_none());
        assert_eq!(registry.volume_ids(), vec!["a".to_string(), "b".to_string()]);

        let replaced = registry.register(info("a"));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.get("b").unwrap().volume_id, "b");
        assert!(registry.remove("b").is_some());
        assert!(registry.get("b").is_none());
        assert!(registry.remove("b").is_none());
    }
}
