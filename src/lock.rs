//! Inter-process advisory file locks
//!
//! One bridge invocation at a time may touch the shared output directory and
//! workspace symlink, so the whole pipeline runs under a global lock file.
//! The symbol cache store uses the same primitive around its
//! read-modify-write cycle.
//!
//! Locks are `flock(2)` based: released when dropped and, because the kernel
//! drops them with the file descriptor, also when the process dies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::report::Diagnostics;

/// Default location of the global build lock.
pub const DEFAULT_BUILD_LOCK_PATH: &str = "/tmp/xcbazel_build.lock";

/// Delay between two acquisition attempts.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock timeout after {0:?}")]
    Timeout(Duration),

    #[error("I/O error on lock file: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock held on a file.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl FileLock {
    /// Acquire an exclusive lock on `lock_path`, creating the file and its
    /// parent directory if needed.
    ///
    /// With `timeout` set to `None` this waits for as long as it takes.
    pub fn acquire(lock_path: &Path, timeout: Option<Duration>) -> LockResult<Self> {
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(lock_path) {
                Ok(file) => {
                    if warned {
                        info!(
                            path = %lock_path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path: lock_path.to_path_buf(),
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        warn!(path = %lock_path.display(), "lock contention, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(LockError::Timeout(timeout));
                }
            }

            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(lock_path)?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// The global lock serializing bridge invocations.
#[derive(Debug)]
pub struct BuildLock {
    _lock: FileLock,
}

impl BuildLock {
    /// Block until no other bridge invocation holds `lock_path`.
    ///
    /// Tells the user through `diag` when the build has to wait.
    pub fn acquire(lock_path: &Path, diag: &mut dyn Diagnostics) -> LockResult<Self> {
        match FileLock::acquire(lock_path, Some(Duration::ZERO)) {
            Ok(lock) => return Ok(Self { _lock: lock }),
            Err(LockError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }

        diag.output("Queuing build...");
        info!(path = %lock_path.display(), "waiting for build lock");
        let lock = FileLock::acquire(lock_path, None)?;
        Ok(Self { _lock: lock })
    }
}
