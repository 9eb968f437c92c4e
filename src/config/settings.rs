//! Configuration settings for overlaysync
//!
//! Defines the CLI arguments, the runtime sync configuration and the remote
//! backend selection.

use crate::core::{DEFAULT_MAX_CONCURRENCY, DEFAULT_QUEUE_SIZE};
use crate::error::{OverlaySyncError, Result};
use crate::vpath::{join_remote, normalize_absolute, PathMapping};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// overlaysync - flush overlay upper layers back to remote storage
#[derive(Parser, Debug, Clone)]
#[command(name = "overlaysync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync the writable upper layer of an overlay mount to remote storage")]
#[command(long_about = r#"
overlaysync walks the upper layer of an overlay mount and replays its changes
on a remote store: new directories are created, opaque directories replace
their remote counterpart, files are uploaded and whiteouts delete the remote
entry.

Examples:
  overlaysync sync --upper /var/lib/vol/upper --path /zone/home/alice --local-root /mnt/store
  overlaysync sync --upper ./upper --path /data --ssh alice@storage --threads 8
  overlaysync resolve --upper ./upper --path /data ./upper/a/b.txt
  overlaysync check-driver --driver fuse-overlayfs
"#)]
pub struct CliArgs {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

impl CliArgs {
    /// Log level filter selected by -v/-q
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Sync an upper layer to remote storage
    #[command(name = "sync")]
    Sync {
        /// Upper layer directory
        #[arg(long, value_name = "DIR")]
        upper: PathBuf,

        /// Volume id used for the status log name
        #[arg(long, default_value = "volume")]
        volume_id: String,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        backend: BackendArgs,

        #[command(flatten)]
        options: SyncOptionArgs,
    },

    /// Show how upper-layer paths would be synced
    #[command(name = "resolve")]
    Resolve {
        /// Upper layer directory
        #[arg(long, value_name = "DIR")]
        upper: PathBuf,

        #[command(flatten)]
        mapping: MappingArgs,

        /// Exclude glob patterns, relative to the upper layer
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,

        /// Local paths inside the upper layer
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Check whether an overlay driver is usable on this host
    #[command(name = "check-driver")]
    CheckDriver {
        /// Driver name (overlay or fuse-overlayfs)
        #[arg(long, default_value = "overlay")]
        driver: String,
    },

    /// Flush a staged volume the way unmount does
    #[command(name = "flush")]
    Flush {
        /// Storage root holding the overlay staging directories
        #[arg(long, value_name = "DIR")]
        storage_path: PathBuf,

        /// Client type directory under the storage root
        #[arg(long, default_value = "local")]
        client_type: String,

        /// Volume id
        #[arg(long)]
        volume_id: String,

        /// Overlay driver the volume was mounted with
        #[arg(long, default_value = "overlay")]
        driver: String,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        backend: BackendArgs,

        #[command(flatten)]
        options: SyncOptionArgs,
    },
}

/// Path mapping arguments
#[derive(Args, Debug, Clone)]
pub struct MappingArgs {
    /// Remote collection mapped at the virtual root
    #[arg(long, value_name = "REMOTE_PATH", conflicts_with = "path_mapping_json")]
    pub path: Option<String>,

    /// JSON array of path mappings
    #[arg(long, value_name = "JSON")]
    pub path_mapping_json: Option<String>,
}

impl MappingArgs {
    /// Build the mapping list
    pub fn to_mappings(&self) -> Result<Vec<PathMapping>> {
        match (&self.path, &self.path_mapping_json) {
            (Some(path), None) => Ok(vec![PathMapping::root(path.clone())]),
            (None, Some(json)) => PathMapping::parse_json(json),
            _ => Err(OverlaySyncError::config(
                "exactly one of --path or --path-mapping-json is required",
            )),
        }
    }
}

/// Remote backend arguments
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Remote store mounted at a local directory
    #[arg(long, value_name = "DIR", conflicts_with = "ssh")]
    pub local_root: Option<PathBuf>,

    /// Remote store reachable over SFTP
    #[arg(long, value_name = "USER@HOST")]
    pub ssh: Option<String>,

    /// SSH port
    #[arg(long, default_value = "22", value_name = "PORT")]
    pub ssh_port: u16,

    /// SSH private key path
    #[arg(long, value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,
}

impl BackendArgs {
    /// Build the backend selection
    pub fn to_backend(&self) -> Result<RemoteBackend> {
        match (&self.local_root, &self.ssh) {
            (Some(root), None) => Ok(RemoteBackend::Local { root: root.clone() }),
            (None, Some(target)) => {
                let (user, host) = parse_ssh_target(target).ok_or_else(|| {
                    OverlaySyncError::config(format!("invalid SSH target '{}', expected user@host", target))
                })?;
                Ok(RemoteBackend::Sftp(RemoteConfig {
                    host,
                    user,
                    port: self.ssh_port,
                    key_path: self.ssh_key.clone(),
                }))
            }
            _ => Err(OverlaySyncError::config(
                "exactly one of --local-root or --ssh is required",
            )),
        }
    }
}

/// Sync tuning arguments
#[derive(Args, Debug, Clone)]
pub struct SyncOptionArgs {
    /// Maximum concurrently running remote operations (0 = auto-detect)
    #[arg(short = 't', long, default_value = "4", value_name = "NUM")]
    pub threads: usize,

    /// Pending task queue capacity
    #[arg(long, default_value = "100", value_name = "NUM")]
    pub queue_size: usize,

    /// Log failed entries and keep going
    #[arg(long)]
    pub continue_on_error: bool,

    /// Remote directory for the sync status log
    #[arg(long, value_name = "REMOTE_DIR")]
    pub status_log_dir: Option<String>,

    /// Exclude glob patterns, relative to the upper layer
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

/// SSH remote configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Username
    pub user: String,
    /// Port
    pub port: u16,
    /// SSH key path
    pub key_path: Option<PathBuf>,
}

/// Which remote backend to connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Remote tree reachable through a local mount point
    Local {
        /// Local directory standing in for the remote root
        root: PathBuf,
    },
    /// SFTP over SSH
    Sftp(RemoteConfig),
}

/// Runtime configuration of one sync session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Volume id
    pub volume_id: String,
    /// Upper layer directory
    pub upper_path: PathBuf,
    /// Path mappings
    pub mappings: Vec<PathMapping>,
    /// Maximum total thread cost of running tasks
    pub max_concurrency: usize,
    /// Pending task queue capacity
    pub queue_size: usize,
    /// Record per-entry failures instead of failing the sync
    pub continue_on_error: bool,
    /// Remote directory for the status log
    pub status_log_dir: Option<String>,
    /// Exclude patterns
    pub exclude_patterns: Vec<String>,
    /// Show a progress bar
    pub show_progress: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            volume_id: "volume".to_string(),
            upper_path: PathBuf::new(),
            mappings: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_size: DEFAULT_QUEUE_SIZE,
            continue_on_error: false,
            status_log_dir: None,
            exclude_patterns: Vec::new(),
            show_progress: false,
        }
    }
}

impl SyncConfig {
    /// Create config from CLI arguments
    pub fn from_cli(
        upper_path: PathBuf,
        volume_id: &str,
        mapping: &MappingArgs,
        options: &SyncOptionArgs,
    ) -> Result<Self> {
        let config = Self {
            volume_id: volume_id.to_string(),
            upper_path,
            mappings: mapping.to_mappings()?,
            max_concurrency: resolve_threads(options.threads),
            queue_size: options.queue_size,
            continue_on_error: options.continue_on_error,
            status_log_dir: options.status_log_dir.clone(),
            exclude_patterns: options.exclude.clone(),
            show_progress: options.progress,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not need the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(OverlaySyncError::config("max concurrency must be at least 1"));
        }
        if self.queue_size == 0 {
            return Err(OverlaySyncError::config("queue size must be at least 1"));
        }
        if self.volume_id.is_empty() || self.volume_id.contains('/') {
            return Err(OverlaySyncError::config(format!(
                "invalid volume id '{}'",
                self.volume_id
            )));
        }
        if let Some(dir) = &self.status_log_dir {
            normalize_absolute(dir)?;
        }
        if self.mappings.is_empty() {
            return Err(OverlaySyncError::config("no path mappings configured"));
        }
        Ok(())
    }

    /// Remote path of the status log, if enabled
    pub fn status_log_path(&self) -> Option<String> {
        self.status_log_dir
            .as_deref()
            .map(|dir| join_remote(dir, &format!(".{}.overlay.sync.log", self.volume_id)))
    }
}

/// Thread count, 0 meaning one per CPU
pub fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get()
    } else {
        threads
    }
}

/// Parse an SSH target (user@host)
pub fn parse_ssh_target(target: &str) -> Option<(String, String)> {
    let (user, host) = target.split_once('@')?;
    if user.is_empty() || host.is_empty() {
        return None;
    }
    Some((user.to_string(), host.to_string()))
}
