//! PID-file lifecycle: discovery, exclusive acquisition, stale cleanup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use agentdb_core::{Error, Result};

/// Contents of `<data_dir>/memory-server.pid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFileContents {
    pub pid: u32,
    /// `unix:<path>` or `http://host:port`
    pub address: String,
    /// Milliseconds since epoch
    pub started_at: i64,
    pub version: String,
}

/// Handle on the daemon PID file.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the PID file, if present and well-formed.
    pub fn read(&self) -> Result<Option<PidFileContents>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(err) => {
                    warn!(%err, "malformed PID file");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Acquire the PID file for this process.
    ///
    /// Refuses when an existing PID is alive; a dead owner's file is
    /// swept and replaced. The file is written with mode 0600.
    pub fn acquire(&self, address: &str, version: &str) -> Result<()> {
        if let Some(existing) = self.read()? {
            if process_alive(existing.pid) {
                return Err(Error::Validation(format!(
                    "daemon already running with pid {}",
                    existing.pid
                )));
            }
            debug!(pid = existing.pid, "removing stale PID file");
            let _ = std::fs::remove_file(&self.path);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = PidFileContents {
            pid: std::process::id(),
            address: address.to_string(),
            started_at: chrono::Utc::now().timestamp_millis(),
            version: version.to_string(),
        };
        write_private(&self.path, &serde_json::to_vec_pretty(&contents)?)?;
        Ok(())
    }

    /// Remove the PID file (shutdown path; best-effort).
    pub fn release(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(%err, "failed to remove PID file");
            }
        }
    }

    /// Address of a live daemon, if one owns the file.
    pub fn live_address(&self) -> Result<Option<String>> {
        match self.read()? {
            Some(contents) if process_alive(contents.pid) => Ok(Some(contents.address)),
            _ => Ok(None),
        }
    }
}

/// Probe liveness with a null signal.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    // Safety: kill with signal 0 performs no action beyond the check.
    unsafe {
        libc::kill(pid as libc::pid_t, 0) == 0
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Write a file with owner-only permissions.
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(bytes)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
