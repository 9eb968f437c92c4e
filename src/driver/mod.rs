//! Node driver
//!
//! Owns the staged volumes of one node and runs the unmount-time flush:
//! the work directory is deleted, the upper layer is synced in a tracked
//! background thread, then the upper layer is deleted whatever the sync
//! outcome. A failed entry never stops the rest of the flush.

mod background;
mod registry;

pub use background::*;
pub use registry::*;

use crate::config::{RemoteBackend, SyncConfig};
use crate::core::{sync_overlay, SyncReport};
use crate::error::{OverlaySyncError, Result};
use crate::fs::{OverlayDriverType, OverlayLayout};
use crate::vpath::{PathMapping, VPathTable};
use std::path::PathBuf;

/// Node-level settings
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Storage root for overlay staging directories
    pub storage_path: PathBuf,
    /// Client type directory under the storage root
    pub client_type: String,
    /// Remote backend every volume syncs to
    pub backend: RemoteBackend,
    /// Sync settings applied to every flush; per-volume fields are filled in
    pub sync: SyncConfig,
}

/// Node driver
pub struct NodeDriver {
    config: DriverConfig,
    registry: VolumeRegistry,
    background: BackgroundSyncs,
}

impl NodeDriver {
    /// Create a driver
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            registry: VolumeRegistry::new(),
            background: BackgroundSyncs::new(),
        }
    }

    /// Staged volumes
    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Background syncs started by unmount
    pub fn background(&self) -> &BackgroundSyncs {
        &self.background
    }

    /// Create the overlay staging directories of a volume and register it
    pub fn stage_volume(
        &self,
        volume_id: &str,
        mappings: Vec<PathMapping>,
        driver: OverlayDriverType,
    ) -> Result<VolumeInfo> {
        VPathTable::from_mappings(&mappings)?;
        if !driver.is_supported() {
            return Err(OverlaySyncError::config(format!(
                "overlay driver '{}' is not supported on this host",
                driver
            )));
        }

        let layout = OverlayLayout::new(&self.config.storage_path, &self.config.client_type, volume_id);
        layout.create_dirs()?;

        let info = VolumeInfo {
            volume_id: volume_id.to_string(),
            layout,
            mappings,
            driver,
            registered_at: chrono::Utc::now(),
        };
        self.registry.register(info.clone());
        tracing::info!("Staged volume {} with {} driver", volume_id, driver);
        Ok(info)
    }

    /// Tear down a volume and flush its upper layer in the background
    pub fn unmount_overlay(&self, volume_id: &str) -> Result<()> {
        let info = self.registry.remove(volume_id).ok_or_else(|| {
            OverlaySyncError::config(format!("volume '{}' is not registered", volume_id))
        })?;
        let layout = info.layout;

        if let Err(e) = layout.delete_workdir() {
            tracing::warn!("Error deleting overlay workdir of {} - ignoring: {}", volume_id, e);
        }
        if let Err(e) = layout.delete_lower() {
            tracing::warn!("Lower mount point of {} not removed - ignoring: {}", volume_id, e);
        }

        for (volume, result) in self.background.reap_finished() {
            match result {
                Ok(report) => tracing::debug!(
                    "Reaped background sync of {}: {} files uploaded",
                    volume,
                    report.files_uploaded
                ),
                Err(e) => tracing::debug!("Reaped failed background sync of {}: {}", volume, e),
            }
        }

        // the upper layer is deleted afterwards, so sync everything that can be
        let sync_config = SyncConfig {
            volume_id: volume_id.to_string(),
            upper_path: layout.upper.clone(),
            mappings: info.mappings,
            continue_on_error: true,
            ..self.config.sync.clone()
        };
        let backend = self.config.backend.clone();
        let volume = volume_id.to_string();

        self.background.spawn(volume_id, move || {
            tracing::info!("Syncing overlay upper of volume {}", volume);
            let result = sync_overlay(sync_config, &backend);
            match &result {
                Ok(_) => tracing::info!("Done syncing overlay upper of volume {}", volume),
                Err(e) => tracing::error!("Error syncing overlay upper of volume {}: {}", volume, e),
            }

            if let Err(e) = layout.delete_upper() {
                tracing::warn!("Error deleting overlay upper of {} - ignoring: {}", volume, e);
            }
            result
        })
    }

    /// Wait for every background sync
    pub fn shutdown(&self) -> Vec<(String, Result<SyncReport>)> {
        self.background.wait_all()
    }
}
