//! Per-session sync status log
//!
//! A plain-text log written to the remote store so users can see what the
//! last flush of their volume did. Writes are best effort.

use crate::error::Result;
use crate::remote::RemoteFs;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Line-oriented status log
pub struct StatusLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StatusLog {
    /// Create or truncate the log file on the remote
    pub fn open(remote: &dyn RemoteFs, path: &str) -> Result<Self> {
        let writer = remote.create_file(path)?;
        tracing::debug!("Opened sync status log {}", path);
        Ok(Self::from_writer(writer))
    }

    /// Wrap an arbitrary writer
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Entry is about to be processed
    pub fn processing(&self, kind: &str, path: &str) {
        self.write_line(&format!("Processing {} {:?}", kind, path));
    }

    /// Entry was processed
    pub fn done(&self, kind: &str, path: &str) {
        self.write_line(&format!("> Done. processed {} {:?}", kind, path));
    }

    /// Entry failed
    pub fn failed(&self, kind: &str, path: &str, reason: &str) {
        self.write_line(&format!("> Fail. failed to process {} {:?}: {}", kind, path, reason));
    }

    /// Free-form session message
    pub fn message(&self, message: &str) {
        self.write_line(message);
    }

    fn write_line(&self, line: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writeln!(writer, "[{}] {}", stamp, line).and_then(|_| writer.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to write sync status log: {}", e);
        }
    }
}

impl std::fmt::Debug for StatusLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_status_lines() {
        let buf = SharedBuf::default();
        let log = StatusLog::from_writer(Box::new(buf.clone()));

        log.processing("dir", "/upper/a");
        log.done("dir", "/upper/a");
        log.failed("file", "/upper/a/b", "permission denied");

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("Processing dir \"/upper/a\""));
        assert!(lines[1].ends_with("> Done. processed dir \"/upper/a\""));
        assert!(lines[2].contains("> Fail. failed to process file \"/upper/a/b\": permission denied"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn test_write_errors_are_swallowed() {
        let log = StatusLog::from_writer(Box::new(BrokenWriter));
        log.processing("file", "/x");
        log.message("still alive");
    }
}
