//! overlaysync CLI - Flush Overlay Upper Layers to Remote Storage
//!
//! Syncs the writable upper layer of an overlay mount to a remote store.

use clap::Parser;
use overlaysync::config::{
    BackendArgs, CliArgs, Commands, MappingArgs, SyncConfig, SyncOptionArgs,
};
use overlaysync::core::{sync_overlay, SyncReport};
use overlaysync::driver::{DriverConfig, NodeDriver};
use overlaysync::error::{IoResultExt, Result};
use overlaysync::fs::{Classifier, KernelInfo, OverlayDriverType, MIN_OVERLAY_KERNEL};
use overlaysync::vpath::{PathResolver, VPathKind};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging, RUST_LOG wins over -v/-q
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level())),
        )
        .with_target(false)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    match &args.command {
        Commands::Sync {
            upper,
            volume_id,
            mapping,
            backend,
            options,
        } => cmd_sync(upper, volume_id, mapping, backend, options, args.quiet),
        Commands::Resolve {
            upper,
            mapping,
            exclude,
            paths,
        } => cmd_resolve(upper, mapping, exclude, paths),
        Commands::CheckDriver { driver } => cmd_check_driver(driver),
        Commands::Flush {
            storage_path,
            client_type,
            volume_id,
            driver,
            mapping,
            backend,
            options,
        } => cmd_flush(
            storage_path,
            client_type,
            volume_id,
            driver,
            mapping,
            backend,
            options,
            args.quiet,
        ),
    }
}

fn cmd_sync(
    upper: &Path,
    volume_id: &str,
    mapping: &MappingArgs,
    backend: &BackendArgs,
    options: &SyncOptionArgs,
    quiet: bool,
) -> Result<()> {
    let mut config = SyncConfig::from_cli(upper.to_path_buf(), volume_id, mapping, options)?;
    if quiet {
        config.show_progress = false;
    }
    let backend = backend.to_backend()?;

    tracing::info!(
        "Syncing {} with {} thread(s)",
        config.upper_path.display(),
        config.max_concurrency
    );
    let report = sync_overlay(config, &backend)?;

    finish_report(&report, quiet);
    Ok(())
}

fn cmd_resolve(
    upper: &Path,
    mapping: &MappingArgs,
    exclude: &[String],
    paths: &[PathBuf],
) -> Result<()> {
    let upper_root = upper.canonicalize().with_path(upper)?;
    let resolver = PathResolver::from_mappings(&upper_root, &mapping.to_mappings()?)?;
    let classifier = Classifier::new(exclude)?;

    for entry in resolver.table().entries() {
        match entry.kind() {
            VPathKind::Virtual => tracing::debug!("Mapping {} (virtual)", entry.mapping_path()),
            VPathKind::Remote {
                remote_path,
                read_only,
                ..
            } => tracing::debug!(
                "Mapping {} -> {}{}",
                entry.mapping_path(),
                remote_path,
                if *read_only { " (read-only)" } else { "" }
            ),
        }
    }

    for path in paths {
        let local = match path.canonicalize() {
            Ok(local) => local,
            Err(e) => {
                println!("{:<14} {} ({})", "error", path.display(), e);
                continue;
            }
        };
        let relative = local.strip_prefix(&upper_root).unwrap_or(&local);
        let disposition = match std::fs::symlink_metadata(&local) {
            Ok(meta) => classifier.classify(&local, relative, meta.file_type()),
            Err(e) => {
                println!("{:<14} {} ({})", "error", path.display(), e);
                continue;
            }
        };

        let target = match resolver.resolve(&local) {
            Ok(resolution) => resolution.remote_path().unwrap_or("read-only").to_string(),
            Err(e) => format!("unresolved ({})", e),
        };
        println!("{:<14} {} -> {}", disposition.to_string(), path.display(), target);
    }

    Ok(())
}

fn cmd_check_driver(name: &str) -> Result<()> {
    let driver = OverlayDriverType::from_name(name);
    println!("Driver: {}", driver);

    if driver == OverlayDriverType::Overlay {
        match KernelInfo::current() {
            Ok(kernel) => println!("Kernel: {} (requires {} or newer)", kernel, MIN_OVERLAY_KERNEL),
            Err(e) => println!("Kernel: unknown ({})", e),
        }
    }

    let supported = driver.is_supported();
    println!("Supported: {}", if supported { "YES" } else { "NO" });
    if !supported {
        std::process::exit(1);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_flush(
    storage_path: &Path,
    client_type: &str,
    volume_id: &str,
    driver: &str,
    mapping: &MappingArgs,
    backend: &BackendArgs,
    options: &SyncOptionArgs,
    quiet: bool,
) -> Result<()> {
    let mappings = mapping.to_mappings()?;
    let mut sync = SyncConfig::from_cli(PathBuf::new(), volume_id, mapping, options)?;
    if quiet {
        sync.show_progress = false;
    }

    let node = NodeDriver::new(DriverConfig {
        storage_path: storage_path.to_path_buf(),
        client_type: client_type.to_string(),
        backend: backend.to_backend()?,
        sync,
    });

    let info = node.stage_volume(volume_id, mappings, OverlayDriverType::from_name(driver))?;
    tracing::info!("Flushing {}", info.layout.upper.display());
    node.unmount_overlay(volume_id)?;

    let mut failed = false;
    for (volume, result) in node.shutdown() {
        match result {
            Ok(report) => {
                if !quiet {
                    println!("Volume {}:", volume);
                    report.print_summary();
                }
                failed |= !report.is_success();
            }
            Err(e) => {
                eprintln!("Volume {}: sync failed: {}", volume, e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }

    Ok(())
}

fn finish_report(report: &SyncReport, quiet: bool) {
    if !quiet {
        report.print_summary();
    }

    if !report.is_success() {
        std::process::exit(1);
    }
}
