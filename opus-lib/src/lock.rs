use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock on a lock file, held until dropped.
///
/// The lock is taken at the OS level so it also excludes other processes.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    /// Wait up to `timeout` for the lock on `path`, creating the file if needed.
    ///
    /// # Errors
    /// A ``std::io::Error`` of kind ``TimedOut`` if another holder keeps the lock
    /// past `timeout`, or any ``std::io::Error`` opening or locking the file.
    pub fn acquire<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TryLockError::WouldBlock) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("lock {path:?} not released within {timeout:?}"),
                    )
                    .into());
                }
                Err(TryLockError::Error(err)) => return Err(err.into()),
            }
        }
        trace!(?path, "acquired lock");
        Ok(Self { path, file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            trace!(path = ?self.path, %err, "failed to release lock");
        }
    }
}
