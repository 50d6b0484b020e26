//! Advisory `flock` locks on files under the state directory.
//!
//! `update.lock` keeps mutating operations exclusive across processes
//! (CLI and daemon); `state.lock` serializes read-modify-write cycles of
//! the state record. The lock file itself is never deleted.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uplift_common::{Error, Result};

/// A held exclusive lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock without waiting.
    ///
    /// Contention is reported as `OperationInProgress` naming the holder
    /// recorded in the lock file, when known.
    pub fn try_acquire(path: &Path, operation: &str) -> Result<Self> {
        let file = open_lock_file(path)?;
        if !flock(&file, true).map_err(|e| Error::disk(path, e))? {
            let holder = std::fs::read_to_string(path).unwrap_or_default();
            let holder = holder.trim();
            return Err(Error::OperationInProgress {
                operation: if holder.is_empty() {
                    "another process holds the update lock".to_string()
                } else {
                    holder.to_string()
                },
            });
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder(operation);
        Ok(lock)
    }

    /// Take the lock, waiting for the current holder.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        flock(&file, false).map_err(|e| Error::disk(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&self, operation: &str) {
        let _ = self.file.set_len(0);
        let mut writer = &self.file;
        let _ = writer.write_all(format!("{} (pid {})", operation, std::process::id()).as_bytes());
        let _ = writer.flush();
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let _ = self.file.set_len(0);
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::disk(parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::disk(path, e))
}

/// Returns Ok(false) when `nonblocking` and the lock is held elsewhere.
#[cfg(unix)]
fn flock(file: &File, nonblocking: bool) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    let mut op = libc::LOCK_EX;
    if nonblocking {
        op |= libc::LOCK_NB;
    }
    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), op) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.kind() {
            std::io::ErrorKind::WouldBlock => return Ok(false),
            std::io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _nonblocking: bool) -> std::io::Result<bool> {
    Ok(true)
}
