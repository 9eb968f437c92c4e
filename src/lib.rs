//! # overlaysync - Flush Overlay Upper Layers to Remote Storage
//!
//! overlaysync replays the changes captured in the writable upper layer of a
//! copy-on-write overlay mount onto a remote store. The upper layer is walked
//! in lexical pre-order, each entry is classified (directory, opaque
//! directory, file, whiteout), mapped to a remote path through longest-prefix
//! virtual path mappings and turned into a remote operation. Operations run on
//! a bounded-concurrency scheduler with barriers between directory groups, so
//! a directory always exists remotely before its contents are written.
//!
//! ## Features
//!
//! - **Bounded Concurrency**: Weighted admission with barrier ordering
//! - **Overlay Semantics**: Opaque directories, whiteouts, bookkeeping files
//! - **Virtual Path Mappings**: Writable and read-only remote subtrees
//! - **Remote Backends**: Locally mounted stores and SFTP
//! - **Status Log**: Per-volume progress log on the remote store
//! - **Node Driver**: Staged volume registry and background flush on unmount
//!
//! ## Quick Start
//!
//! ```no_run
//! use overlaysync::config::{RemoteBackend, SyncConfig};
//! use overlaysync::core::sync_overlay;
//! use overlaysync::vpath::PathMapping;
//! use std::path::PathBuf;
//!
//! let config = SyncConfig {
//!     volume_id: "pvc-1234".to_string(),
//!     upper_path: PathBuf::from("/var/lib/overlay/pvc-1234-overlayfs-upper"),
//!     mappings: vec![PathMapping::root("/zone/home/alice")],
//!     ..Default::default()
//! };
//! let backend = RemoteBackend::Local { root: PathBuf::from("/mnt/store") };
//!
//! let report = sync_overlay(config, &backend).unwrap();
//! report.print_summary();
//! ```
//!
//! ## Scheduling Work Directly
//!
//! ```no_run
//! use overlaysync::core::TaskScheduler;
//!
//! let scheduler = TaskScheduler::with_max_concurrency(4);
//! scheduler.start().unwrap();
//! scheduler.schedule("create /a", |_| Ok(()), 1).unwrap();
//! scheduler.schedule_barrier("after /a").unwrap();
//! scheduler.schedule("upload /a/b", |_| Ok(()), 1).unwrap();
//! scheduler.done_scheduling();
//! scheduler.wait().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod fs;
pub mod progress;
pub mod remote;
pub mod vpath;

// Re-export commonly used types
pub use config::{RemoteBackend, SyncConfig};
pub use core::{OverlaySyncer, SyncReport, TaskScheduler};
pub use error::{OverlaySyncError, Result};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use overlaysync::prelude::*;
    //! ```

    pub use crate::config::{RemoteBackend, RemoteConfig, SyncConfig};
    pub use crate::core::{sync_overlay, OverlaySyncer, SyncReport, TaskScheduler};
    pub use crate::driver::{DriverConfig, NodeDriver};
    pub use crate::error::{OverlaySyncError, Result};
    pub use crate::fs::{Classifier, Disposition, OverlayDriverType, OverlayLayout};
    pub use crate::progress::ProgressReporter;
    pub use crate::remote::{LocalRemote, RemoteFs, SftpRemote};
    pub use crate::vpath::{PathMapping, PathResolver, Resolution};
}
