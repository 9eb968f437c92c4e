//! SFTP remote backend
//!
//! Talks to the remote store over SSH using the SFTP subsystem.

use crate::config::RemoteConfig;
use crate::error::{OverlaySyncError, Result};
use crate::remote::{open_upload_source, RemoteEntry, RemoteFs};
use crate::vpath::join_remote;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;

/// SFTP status code for a missing file
const SFTP_NO_SUCH_FILE: i32 = 2;

/// SFTP-backed remote filesystem
pub struct SftpRemote {
    /// SSH session
    session: Session,
    /// SFTP channel
    sftp: Sftp,
    /// Remote configuration
    config: RemoteConfig,
}

impl SftpRemote {
    /// Connect to remote host
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| OverlaySyncError::connection(&config.host, e.to_string()))?;

        let mut session =
            Session::new().map_err(|e| OverlaySyncError::connection(&config.host, e.to_string()))?;

        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| OverlaySyncError::connection(&config.host, e.to_string()))?;

        Self::authenticate(&mut session, config)?;

        let sftp = session
            .sftp()
            .map_err(|e| OverlaySyncError::connection(&config.host, e.to_string()))?;

        tracing::info!("Connected to {}@{} over SFTP", config.user, addr);

        Ok(Self {
            session,
            sftp,
            config: config.clone(),
        })
    }

    /// Authenticate with the remote host
    fn authenticate(session: &mut Session, config: &RemoteConfig) -> Result<()> {
        let auth_err = |e: ssh2::Error| OverlaySyncError::auth(&config.user, &config.host, e.to_string());

        if let Some(key_path) = &config.key_path {
            session
                .userauth_pubkey_file(&config.user, None, key_path, None)
                .map_err(auth_err)?;
        } else {
            let mut agent = session.agent().map_err(auth_err)?;
            agent.connect().map_err(auth_err)?;
            agent.list_identities().map_err(auth_err)?;

            let identities = agent.identities().map_err(auth_err)?;
            let authenticated = identities
                .iter()
                .any(|identity| agent.userauth(&config.user, identity).is_ok());

            if !authenticated {
                return Err(OverlaySyncError::auth(
                    &config.user,
                    &config.host,
                    "No valid SSH key found in agent",
                ));
            }
        }

        if !session.authenticated() {
            return Err(OverlaySyncError::auth(
                &config.user,
                &config.host,
                "Authentication failed",
            ));
        }

        Ok(())
    }

    fn map_err(op: &'static str, path: &str, err: ssh2::Error) -> OverlaySyncError {
        if err.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) {
            OverlaySyncError::RemoteNotFound(path.to_string())
        } else {
            OverlaySyncError::remote(op, path, err)
        }
    }

    fn forgive_missing(result: Result<()>, force: bool) -> Result<()> {
        match result {
            Err(e) if force && e.is_not_found() => Ok(()),
            other => other,
        }
    }

    fn remove_tree(&self, path: &str) -> Result<()> {
        for child in self.list_dir(path)? {
            if child.is_dir {
                self.remove_tree(&child.path)?;
            } else {
                self.sftp
                    .unlink(Path::new(&child.path))
                    .map_err(|e| Self::map_err("unlink", &child.path, e))?;
            }
        }
        self.sftp
            .rmdir(Path::new(path))
            .map_err(|e| Self::map_err("rmdir", path, e))
    }
}

impl RemoteFs for SftpRemote {
    fn describe(&self) -> String {
        format!("sftp://{}@{}:{}", self.config.user, self.config.host, self.config.port)
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry> {
        let stat = self
            .sftp
            .stat(Path::new(path))
            .map_err(|e| Self::map_err("stat", path, e))?;

        Ok(RemoteEntry {
            path: path.to_string(),
            size: stat.size.unwrap_or(0),
            is_dir: stat.is_dir(),
            mtime: stat.mtime.unwrap_or(0),
        })
    }

    fn make_dir(&self, path: &str, recursive: bool) -> Result<()> {
        if !recursive {
            return self
                .sftp
                .mkdir(Path::new(path), 0o755)
                .map_err(|e| Self::map_err("mkdir", path, e));
        }

        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);

            match self.stat(&current) {
                Ok(entry) if entry.is_dir => {}
                Ok(_) => {
                    return Err(OverlaySyncError::remote(
                        "mkdir",
                        &current,
                        "path exists but is not a directory",
                    ));
                }
                Err(e) if e.is_not_found() => {
                    self.sftp
                        .mkdir(Path::new(&current), 0o755)
                        .map_err(|e| Self::map_err("mkdir", &current, e))?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn remove_dir(&self, path: &str, recursive: bool, force: bool) -> Result<()> {
        let result = if recursive {
            self.remove_tree(path)
        } else {
            self.sftp
                .rmdir(Path::new(path))
                .map_err(|e| Self::map_err("rmdir", path, e))
        };
        Self::forgive_missing(result, force)
    }

    fn remove_file(&self, path: &str, force: bool) -> Result<()> {
        let result = self
            .sftp
            .unlink(Path::new(path))
            .map_err(|e| Self::map_err("unlink", path, e));
        Self::forgive_missing(result, force)
    }

    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| Self::map_err("readdir", path, e))?;

        entries
            .into_iter()
            .map(|(child, stat)| {
                let name = child
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| OverlaySyncError::InvalidPath(child.display().to_string()))?;
                Ok(RemoteEntry {
                    path: join_remote(path, name),
                    size: stat.size.unwrap_or(0),
                    is_dir: stat.is_dir(),
                    mtime: stat.mtime.unwrap_or(0),
                })
            })
            .collect()
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let local_file = open_upload_source(local)?;

        let mut remote_file = self
            .sftp
            .create(Path::new(remote))
            .map_err(|e| Self::map_err("upload", remote, e))?;

        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, local_file);
        let mut buffer = vec![0u8; 1024 * 1024];
        let mut bytes_copied = 0u64;

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .map_err(|e| OverlaySyncError::io(local, e))?;

            if bytes_read == 0 {
                break;
            }

            remote_file
                .write_all(&buffer[..bytes_read])
                .map_err(|e| OverlaySyncError::remote("upload", remote, e))?;

            bytes_copied += bytes_read as u64;
        }

        Ok(bytes_copied)
    }

    fn create_file(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let file = self
            .sftp
            .create(Path::new(path))
            .map_err(|e| Self::map_err("create", path, e))?;
        Ok(Box::new(file))
    }

    fn release(&self) -> Result<()> {
        self.session
            .disconnect(None, "sync finished", None)
            .map_err(|e| OverlaySyncError::connection(&self.config.host, e.to_string()))?;
        tracing::debug!("Released {}", self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a reachable SSH server with agent auth
    #[test]
    #[ignore]
    fn test_sftp_connect_and_stat_root() {
        let config = RemoteConfig {
            host: "localhost".to_string(),
            user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            port: 22,
            key_path: None,
        };

        let remote = SftpRemote::connect(&config).unwrap();
        assert!(remote.stat("/").unwrap().is_dir);
        assert!(remote.stat("/definitely/not/here").unwrap_err().is_not_found());
        remote.release().unwrap();
    }
}
