use crate::errors::{StoreError, StoreResult};
use fs2::FileExt;
use log::debug;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Interval between two attempts to take a contended lock
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive advisory lock (`flock` on Unix, `LockFile` on Windows) over the data directory.
///
/// The lock is held by the open file description, so two handles within the same process
/// contend exactly like two processes do. The file itself is left in place on release:
/// removing it would let a waiter lock an orphaned inode.
#[derive(Debug)]
pub struct Lockfile {
    file: File,
    path: PathBuf,
}

impl Lockfile {
    /// Takes the lock at `path`, creating the file if needed, waiting at most `timeout`
    pub fn acquire(path: PathBuf, timeout: Duration) -> StoreResult<Self> {
        let file = open_lock_file(&path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("acquired database lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(err) if is_contended(&err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout { path, timeout });
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("failed releasing database lock {}: {err}", self.path.display());
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

#[cfg(unix)]
fn open_lock_file(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new().read(true).write(true).create(true).truncate(false).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
}
