use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Advisory lock errors for file-backed resolver state.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock timed out after {waited:?} at {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy)]
enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct FileGuard {
    file: File,
    path: PathBuf,
}

impl FileGuard {
    fn acquire(path: &Path, timeout: Duration, kind: LockKind) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            let busy = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file).is_err(),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file).is_err(),
            };

            if !busy {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(2));
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Exclusive lock held while a resolver pointer is read-compared-written.
#[derive(Debug)]
pub struct PointerWriteLock {
    guard: FileGuard,
}

impl PointerWriteLock {
    /// Acquire an exclusive advisory lock, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if another holder keeps the lock, or I/O errors
    /// creating the lock file.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Ok(Self {
            guard: FileGuard::acquire(path, timeout, LockKind::Exclusive)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

/// Shared lock held while a resolver pointer is read.
#[derive(Debug)]
pub struct PointerReadLock {
    guard: FileGuard,
}

impl PointerReadLock {
    /// Acquire a shared advisory lock, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`PointerWriteLock::acquire`].
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Ok(Self {
            guard: FileGuard::acquire(path, timeout, LockKind::Shared)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

#[cfg(test)]
mod tests {
    use super::{LockError, PointerReadLock, PointerWriteLock};
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn write_lock_allows_acquire_and_release() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("basic.lock");
        let lock = PointerWriteLock::acquire(&path, Duration::from_millis(50))?;
        assert_eq!(lock.path(), path.as_path());
        drop(lock);
        let _again = PointerWriteLock::acquire(&path, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn write_lock_times_out_when_held() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("timeout.lock");
        let _guard = PointerWriteLock::acquire(&path, Duration::from_millis(50))?;
        let err = PointerWriteLock::acquire(&path, Duration::from_millis(20))
            .expect_err("second writer should time out");

        assert!(matches!(err, LockError::Timeout { path: p, .. } if p == path));
        Ok(())
    }

    #[test]
    fn read_locks_are_compatible() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("share.lock");
        let first = PointerReadLock::acquire(&path, Duration::from_millis(50))?;
        let second = PointerReadLock::acquire(&path, Duration::from_millis(50))?;
        drop(first);
        drop(second);
        Ok(())
    }

    #[test]
    fn writer_blocks_readers_until_released() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("thread.lock");

        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let held_thread = Arc::clone(&held);
        let release_thread = Arc::clone(&release);
        let path_in_thread = path.clone();
        let handle = thread::spawn(move || {
            let writer = PointerWriteLock::acquire(&path_in_thread, Duration::from_millis(200))
                .expect("writer lock");
            held_thread.wait();
            release_thread.wait();
            drop(writer);
        });

        held.wait();
        assert!(matches!(
            PointerReadLock::acquire(&path, Duration::from_millis(20)),
            Err(LockError::Timeout { .. })
        ));
        release.wait();
        handle.join().expect("writer thread");

        let _reader = PointerReadLock::acquire(&path, Duration::from_millis(50))?;
        Ok(())
    }
}
