//! Single-instance advisory lock.
//!
//! `runtime/instance.lock` holds the owning PID. A second gateway on the
//! same workspace refuses to start (exit code 1). A lock left behind by
//! a dead process is reclaimed.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Advisory lock file with holder PID; removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

/// Why the lock could not be acquired.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("instance lock held by pid {0}")]
    Contended(u32),

    /// Filesystem failure while acquiring.
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstanceLock {
    /// Acquire the lock at `path`, reclaiming stale files.
    pub fn acquire(path: PathBuf) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Ok(content) = fs::read_to_string(&path) {
            let holder: Option<u32> = content.trim().parse().ok();
            match holder {
                Some(pid) if process_alive(pid) => return Err(LockError::Contended(pid)),
                _ => {
                    // Stale or unreadable lock: reclaim it.
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        write!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, treat any recorded holder as live.
    true
}
