//! Remote backend reachable through a local mount point
//!
//! Covers NFS, WebDAV and FUSE storage clients: remote path `/a/b` maps to
//! `<root>/a/b`.

use crate::error::{IoResultExt, OverlaySyncError, Result};
use crate::remote::{open_upload_source, RemoteEntry, RemoteFs};
use crate::vpath::join_remote;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Remote filesystem rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalRemote {
    root: PathBuf,
}

impl LocalRemote {
    /// Create a backend over an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).with_path(&root)?;
        if !meta.is_dir() {
            return Err(OverlaySyncError::config(format!(
                "local backend root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Backend root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, remote: &str) -> Result<PathBuf> {
        let rel = Path::new(remote.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(OverlaySyncError::InvalidPath(remote.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn map_err(op: &'static str, remote: &str, err: io::Error) -> OverlaySyncError {
        if err.kind() == io::ErrorKind::NotFound {
            OverlaySyncError::RemoteNotFound(remote.to_string())
        } else {
            OverlaySyncError::remote(op, remote, err)
        }
    }

    fn entry(remote: &str, meta: &fs::Metadata) -> RemoteEntry {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        RemoteEntry {
            path: remote.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            mtime,
        }
    }

    fn forgive_missing(result: Result<()>, force: bool) -> Result<()> {
        match result {
            Err(e) if force && e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

impl RemoteFs for LocalRemote {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry> {
        let local = self.local_path(path)?;
        let meta = fs::metadata(&local).map_err(|e| Self::map_err("stat", path, e))?;
        Ok(Self::entry(path, &meta))
    }

    fn make_dir(&self, path: &str, recursive: bool) -> Result<()> {
        let local = self.local_path(path)?;
        let result = if recursive {
            fs::create_dir_all(&local)
        } else {
            fs::create_dir(&local)
        };
        result.map_err(|e| Self::map_err("mkdir", path, e))
    }

    fn remove_dir(&self, path: &str, recursive: bool, force: bool) -> Result<()> {
        let local = self.local_path(path)?;
        let result = if recursive {
            fs::remove_dir_all(&local)
        } else {
            fs::remove_dir(&local)
        };
        Self::forgive_missing(result.map_err(|e| Self::map_err("rmdir", path, e)), force)
    }

    fn remove_file(&self, path: &str, force: bool) -> Result<()> {
        let local = self.local_path(path)?;
        let result = fs::remove_file(&local).map_err(|e| Self::map_err("unlink", path, e));
        Self::forgive_missing(result, force)
    }

    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let local = self.local_path(path)?;
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&local).map_err(|e| Self::map_err("readdir", path, e))? {
            let dirent = dirent.map_err(|e| Self::map_err("readdir", path, e))?;
            let name = dirent.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| OverlaySyncError::InvalidPath(dirent.path().display().to_string()))?;
            let child = join_remote(path, name);
            let meta = dirent
                .metadata()
                .map_err(|e| Self::map_err("stat", &child, e))?;
            entries.push(Self::entry(&child, &meta));
        }
        Ok(entries)
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let source = open_upload_source(local)?;
        let target_path = self.local_path(remote)?;
        let target = File::create(&target_path).map_err(|e| Self::map_err("upload", remote, e))?;

        let mut reader = BufReader::with_capacity(1024 * 1024, source);
        let mut writer = BufWriter::with_capacity(1024 * 1024, target);
        let bytes = io::copy(&mut reader, &mut writer)
            .map_err(|e| OverlaySyncError::remote("upload", remote, e))?;
        writer
            .flush()
            .map_err(|e| OverlaySyncError::remote("upload", remote, e))?;

        Ok(bytes)
    }

    fn create_file(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let local = self.local_path(path)?;
        let file = File::create(&local).map_err(|e| Self::map_err("create", path, e))?;
        Ok(Box::new(file))
    }

    fn release(&self) -> Result<()> {
        tracing::debug!("Released {}", self.describe());
        Ok(())
    }
}
