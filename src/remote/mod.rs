//! Remote storage backends
//!
//! The sync engine talks to remote storage only through [`RemoteFs`].
//! Remote paths are absolute, slash-separated strings.

pub mod local;
pub mod sftp;

pub use local::LocalRemote;
pub use sftp::SftpRemote;

use crate::config::RemoteBackend;
use crate::error::{IoResultExt, OverlaySyncError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Remote file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Full remote path
    pub path: String,
    /// File size
    pub size: u64,
    /// Is directory
    pub is_dir: bool,
    /// Modification time (Unix timestamp)
    pub mtime: u64,
}

/// Operations the sync engine needs from a remote filesystem
///
/// `force` on removal means an entry that is already gone is not an error.
/// A missing entry is reported as `OverlaySyncError::RemoteNotFound`.
pub trait RemoteFs: Send + Sync {
    /// Short backend description for logs
    fn describe(&self) -> String;

    /// Get remote entry info
    fn stat(&self, path: &str) -> Result<RemoteEntry>;

    /// Create a directory, with missing parents if `recursive`
    fn make_dir(&self, path: &str, recursive: bool) -> Result<()>;

    /// Remove a directory, with its contents if `recursive`
    fn remove_dir(&self, path: &str, recursive: bool, force: bool) -> Result<()>;

    /// Remove a file
    fn remove_file(&self, path: &str, force: bool) -> Result<()>;

    /// List immediate children of a directory
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Upload a local file, overwriting the remote file. Returns bytes written.
    fn upload_file(&self, local: &Path, remote: &str) -> Result<u64>;

    /// Create or truncate a remote file for writing
    fn create_file(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Release the connection
    fn release(&self) -> Result<()>;
}

/// Connect to the configured backend
pub fn connect(backend: &RemoteBackend) -> Result<Arc<dyn RemoteFs>> {
    match backend {
        RemoteBackend::Local { root } => Ok(Arc::new(LocalRemote::new(root)?)),
        RemoteBackend::Sftp(config) => Ok(Arc::new(SftpRemote::connect(config)?)),
    }
}

/// Open a local file for upload
///
/// Opened non-blocking so a FIFO behind a symlink cannot stall a worker;
/// anything that is not a regular file is rejected.
pub fn open_upload_source(local: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits());
    }

    let file = options.open(local).with_path(local)?;
    let meta = file.metadata().with_path(local)?;
    if !meta.is_file() {
        return Err(OverlaySyncError::io(
            local,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_upload_source_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"data").unwrap();

        let mut content = String::new();
        io::Read::read_to_string(&mut open_upload_source(&path).unwrap(), &mut content).unwrap();
        assert_eq!(content, "data");
    }

    #[cfg(unix)]
    #[test]
    fn test_open_upload_source_rejects_fifo_and_dir() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::S_IRWXU).unwrap();
        std::os::unix::fs::symlink(&fifo, dir.path().join("link")).unwrap();

        // returns instead of waiting for a writer
        assert!(open_upload_source(&dir.path().join("link")).is_err());
        assert!(open_upload_source(&fifo).is_err());
        assert!(open_upload_source(dir.path()).is_err());
    }
}
