//! Overlay sync engine
//!
//! Walks an overlay upper layer in lexical pre-order, classifies and resolves
//! every entry, and replays the changes on the remote store through the task
//! scheduler. A barrier separates the entries of consecutive directories so a
//! directory is in place remotely before anything inside it is touched.

use crate::config::{RemoteBackend, SyncConfig};
use crate::core::{SchedulerConfig, StatusLog, TaskScheduler};
use crate::error::{IoResultExt, OverlaySyncError, Result};
use crate::fs::{is_dir_empty, Classifier, Disposition};
use crate::progress::ProgressReporter;
use crate::remote::{self, RemoteFs};
use crate::vpath::{PathResolver, Resolution};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Sync session result
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Remote directories created
    pub dirs_created: u64,
    /// Existing remote directories kept
    pub dirs_merged: u64,
    /// Remote directories cleared by opaque directories
    pub dirs_replaced: u64,
    /// Files uploaded
    pub files_uploaded: u64,
    /// Bytes uploaded
    pub bytes_uploaded: u64,
    /// Remote entries deleted by whiteouts
    pub whiteouts_deleted: u64,
    /// Whiteouts whose remote entry was already gone
    pub whiteouts_missing: u64,
    /// Entries skipped because they map to read-only paths
    pub read_only_skipped: u64,
    /// Bookkeeping or excluded entries
    pub ignored: u64,
    /// Tasks skipped after a failure
    pub tasks_drained: u64,
    /// Failed entries recorded in continue-on-error mode
    pub failures: Vec<(String, String)>,
    /// Total duration
    pub duration: Duration,
}

impl SyncReport {
    /// Check if every entry was synced
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.tasks_drained == 0
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Sync Summary ===");
        println!("Directories:     {} created, {} merged, {} replaced",
            self.dirs_created, self.dirs_merged, self.dirs_replaced);
        println!("Files uploaded:  {}", self.files_uploaded);
        println!("Bytes uploaded:  {}", humansize::format_size(self.bytes_uploaded, humansize::BINARY));
        println!("Whiteouts:       {} deleted, {} already gone", self.whiteouts_deleted, self.whiteouts_missing);
        println!("Skipped:         {} read-only, {} ignored", self.read_only_skipped, self.ignored);
        println!("Duration:        {:.2?}", self.duration);

        if self.tasks_drained > 0 {
            println!("Drained tasks:   {}", self.tasks_drained);
        }

        if !self.failures.is_empty() {
            println!("\nFailures: {}", self.failures.len());
            for (path, error) in &self.failures {
                println!("  {} - {}", path, error);
            }
        }
    }
}

#[derive(Debug, Default)]
struct SyncCounters {
    dirs_created: AtomicU64,
    dirs_merged: AtomicU64,
    dirs_replaced: AtomicU64,
    files_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    whiteouts_deleted: AtomicU64,
    whiteouts_missing: AtomicU64,
    read_only_skipped: AtomicU64,
    ignored: AtomicU64,
    failures: Mutex<Vec<(String, String)>>,
}

impl SyncCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, tasks_drained: u64, duration: Duration) -> SyncReport {
        SyncReport {
            dirs_created: self.dirs_created.load(Ordering::Relaxed),
            dirs_merged: self.dirs_merged.load(Ordering::Relaxed),
            dirs_replaced: self.dirs_replaced.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            whiteouts_deleted: self.whiteouts_deleted.load(Ordering::Relaxed),
            whiteouts_missing: self.whiteouts_missing.load(Ordering::Relaxed),
            read_only_skipped: self.read_only_skipped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            tasks_drained,
            failures: self.failures.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            duration,
        }
    }
}

/// Releases the remote connection exactly once
struct ConnectionGuard {
    remote: Arc<dyn RemoteFs>,
    released: AtomicBool,
}

impl ConnectionGuard {
    fn new(remote: Arc<dyn RemoteFs>) -> Self {
        Self {
            remote,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.remote.release() {
            tracing::error!("Failed to release {}: {}", self.remote.describe(), e);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum DirState {
    Created,
    Existing,
}

/// State shared by the walk and every scheduled task
struct SyncContext {
    remote: Arc<dyn RemoteFs>,
    status: Option<StatusLog>,
    progress: Option<ProgressReporter>,
    counters: SyncCounters,
    continue_on_error: bool,
}

impl SyncContext {
    /// Run one entry action with status logging and failure handling
    fn run(&self, disposition: Disposition, local: &Path, remote_path: &str) -> Result<()> {
        self.started(disposition, remote_path);
        let result = match disposition {
            Disposition::MergeDir => self.merge_dir(remote_path),
            Disposition::ReplaceDir => self.replace_dir(remote_path),
            Disposition::UploadFile => self.upload_file(local, remote_path),
            Disposition::DeleteRemote => self.delete_remote(remote_path),
            Disposition::Ignored => Ok(()),
        };
        self.finish(disposition, remote_path, result)
    }

    /// Record the outcome of an entry; `target` is the remote path when known
    fn finish(&self, disposition: Disposition, target: &str, result: Result<()>) -> Result<()> {
        let kind = disposition.label();

        if let Some(progress) = &self.progress {
            progress.task_finished();
        }

        match result {
            Ok(()) => {
                tracing::debug!("Processed {} {}", kind, target);
                if let Some(status) = &self.status {
                    status.done(kind, target);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(status) = &self.status {
                    status.failed(kind, target, &e.to_string());
                }
                // a dead connection fails every later entry too
                if self.continue_on_error && !e.is_fatal() {
                    tracing::error!("Failed to sync {} {}: {}", kind, target, e);
                    self.counters
                        .failures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((target.to_string(), e.to_string()));
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn started(&self, disposition: Disposition, target: &str) {
        if let Some(status) = &self.status {
            status.processing(disposition.label(), target);
        }
    }

    /// Make sure a directory exists at `remote_path`, replacing a file
    fn ensure_dir(&self, remote_path: &str) -> Result<DirState> {
        match self.remote.stat(remote_path) {
            Ok(entry) if entry.is_dir => Ok(DirState::Existing),
            Ok(_) => {
                tracing::debug!("Replacing remote file {} with a directory", remote_path);
                self.remote.remove_file(remote_path, true)?;
                self.remote.make_dir(remote_path, true)?;
                Ok(DirState::Created)
            }
            Err(e) if e.is_not_found() => {
                self.remote.make_dir(remote_path, true)?;
                Ok(DirState::Created)
            }
            Err(e) => Err(e),
        }
    }

    fn merge_dir(&self, remote_path: &str) -> Result<()> {
        match self.ensure_dir(remote_path)? {
            DirState::Created => SyncCounters::bump(&self.counters.dirs_created),
            DirState::Existing => SyncCounters::bump(&self.counters.dirs_merged),
        }
        Ok(())
    }

    fn replace_dir(&self, remote_path: &str) -> Result<()> {
        if let DirState::Existing = self.ensure_dir(remote_path)? {
            for child in self.remote.list_dir(remote_path)? {
                tracing::trace!("Clearing {} for opaque directory", child.path);
                let removed = if child.is_dir {
                    self.remote.remove_dir(&child.path, true, true)
                } else {
                    self.remote.remove_file(&child.path, true)
                };
                removed.map_err(|e| {
                    e.with_context(format!("clearing opaque directory {}", remote_path))
                })?;
            }
        }
        SyncCounters::bump(&self.counters.dirs_replaced);
        Ok(())
    }

    fn upload_file(&self, local: &Path, remote_path: &str) -> Result<()> {
        match self.remote.stat(remote_path) {
            Ok(entry) if entry.is_dir => {
                tracing::debug!("Removing remote directory {} to upload a file", remote_path);
                self.remote.remove_dir(remote_path, true, true)?;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let bytes = self.remote.upload_file(local, remote_path)?;
        SyncCounters::bump(&self.counters.files_uploaded);
        self.counters.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        if let Some(progress) = &self.progress {
            progress.add_bytes(bytes);
        }
        Ok(())
    }

    fn delete_remote(&self, remote_path: &str) -> Result<()> {
        match self.remote.stat(remote_path) {
            Ok(entry) if entry.is_dir => self.remote.remove_dir(remote_path, true, true)?,
            Ok(_) => self.remote.remove_file(remote_path, true)?,
            Err(e) if e.is_not_found() => {
                SyncCounters::bump(&self.counters.whiteouts_missing);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        SyncCounters::bump(&self.counters.whiteouts_deleted);
        Ok(())
    }
}

/// One sync session over one upper layer
///
/// The remote handle belongs to the session and is released when the session
/// ends, whatever the outcome.
pub struct OverlaySyncer {
    upper_root: PathBuf,
    resolver: PathResolver,
    classifier: Classifier,
    connection: ConnectionGuard,
    config: SyncConfig,
    progress: Option<ProgressReporter>,
}

impl OverlaySyncer {
    /// Create a session
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteFs>) -> Result<Self> {
        let connection = ConnectionGuard::new(remote);

        config.validate()?;
        let upper_root = config
            .upper_path
            .canonicalize()
            .with_path(&config.upper_path)?;
        let resolver = PathResolver::from_mappings(&upper_root, &config.mappings)?;
        let classifier = Classifier::new(&config.exclude_patterns)?;

        Ok(Self {
            upper_root,
            resolver,
            classifier,
            connection,
            config,
            progress: None,
        })
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Absolute upper root
    pub fn upper_root(&self) -> &Path {
        &self.upper_root
    }

    /// Run the sync and end the session
    pub fn sync(mut self) -> Result<SyncReport> {
        let start_time = Instant::now();
        let result = self.run(start_time);
        self.connection.release();
        result
    }

    fn run(&mut self, start_time: Instant) -> Result<SyncReport> {
        if is_dir_empty(&self.upper_root)? {
            tracing::info!("Upper layer {} is empty, nothing to sync", self.upper_root.display());
            return Ok(SyncReport {
                duration: start_time.elapsed(),
                ..Default::default()
            });
        }

        let status = match self.config.status_log_path() {
            Some(path) => Some(StatusLog::open(self.connection.remote.as_ref(), &path)?),
            None => None,
        };

        let ctx = Arc::new(SyncContext {
            remote: Arc::clone(&self.connection.remote),
            status,
            progress: self.progress.take(),
            counters: SyncCounters::default(),
            continue_on_error: self.config.continue_on_error,
        });

        if let Some(status) = &ctx.status {
            status.message(&format!(
                "Syncing upper layer {} to {}",
                self.upper_root.display(),
                ctx.remote.describe()
            ));
        }

        let scheduler = TaskScheduler::new(SchedulerConfig {
            max_concurrency: self.config.max_concurrency,
            queue_size: self.config.queue_size,
        });
        scheduler.start()?;

        tracing::info!(
            "Syncing {} to {} with {} workers",
            self.upper_root.display(),
            ctx.remote.describe(),
            self.config.max_concurrency
        );

        let walk_result = self.walk(&scheduler, &ctx);

        scheduler.done_scheduling();
        let wait_result = scheduler.wait();
        let drained = scheduler.stats().tasks_drained.load(Ordering::Relaxed);

        let outcome = walk_result.and(wait_result);
        if let Some(progress) = &ctx.progress {
            match &outcome {
                Ok(()) => progress.finish_success("Sync complete"),
                Err(e) => progress.finish_error(&e.to_string()),
            }
        }
        if let Some(status) = &ctx.status {
            match &outcome {
                Ok(()) => status.message("Sync finished"),
                Err(e) => status.message(&format!("Sync failed: {}", e)),
            }
        }
        outcome?;

        let report = ctx.counters.snapshot(drained, start_time.elapsed());
        tracing::info!(
            "Synced {} in {:.2?}: {} files, {} dirs created, {} whiteouts",
            self.upper_root.display(),
            report.duration,
            report.files_uploaded,
            report.dirs_created,
            report.whiteouts_deleted
        );
        Ok(report)
    }

    /// Walk the upper layer and schedule one task per entry
    fn walk(&self, scheduler: &TaskScheduler, ctx: &Arc<SyncContext>) -> Result<()> {
        let mut walker = WalkDir::new(&self.upper_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        let mut current_parent: Option<PathBuf> = None;

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| OverlaySyncError::Walk {
                path: e.path().map_or_else(|| self.upper_root.clone(), Path::to_path_buf),
                message: e.to_string(),
            })?;

            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.upper_root).unwrap_or(path);

            if let Some(parent) = path.parent() {
                if current_parent.as_deref() != Some(parent) {
                    if let Err(e) = scheduler.schedule_barrier(format!("barrier {}", parent.display())) {
                        tracing::error!("Failed to schedule barrier for {}: {}", parent.display(), e);
                    }
                    current_parent = Some(parent.to_path_buf());
                }
            }

            let disposition = self.classifier.classify(path, relative, entry.file_type());
            if disposition == Disposition::Ignored {
                tracing::trace!("Ignoring {}", path.display());
                SyncCounters::bump(&ctx.counters.ignored);
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let task_name = format!("{} {}", disposition, relative.display());
            let local = path.to_path_buf();
            let task_ctx = Arc::clone(ctx);

            let scheduled = match self.resolver.resolve(path) {
                Ok(Resolution::ReadOnly) => {
                    tracing::debug!("Skipping {}, it maps to a read-only path", path.display());
                    SyncCounters::bump(&ctx.counters.read_only_skipped);
                    continue;
                }
                Ok(Resolution::Remote(remote_path)) => scheduler.schedule(
                    task_name,
                    move |_| task_ctx.run(disposition, &local, &remote_path),
                    1,
                ),
                Err(e) => {
                    let target = local.display().to_string();
                    scheduler.schedule(
                        task_name,
                        move |_| {
                            task_ctx.started(disposition, &target);
                            task_ctx.finish(disposition, &target, Err(e))
                        },
                        1,
                    )
                }
            };

            match scheduled {
                Ok(()) => {
                    if let Some(progress) = &ctx.progress {
                        progress.task_scheduled();
                        progress.set_current(&relative.display().to_string());
                    }
                }
                Err(e) => tracing::error!("Failed to schedule {}: {}", path.display(), e),
            }
        }

        Ok(())
    }
}

/// Connect to the backend and run one sync session
pub fn sync_overlay(config: SyncConfig, backend: &RemoteBackend) -> Result<SyncReport> {
    let remote = remote::connect(backend)?;
    let show_progress = config.show_progress;
    let progress = if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::disabled()
    };
    OverlaySyncer::new(config, remote)?.with_progress(progress).sync()
}
