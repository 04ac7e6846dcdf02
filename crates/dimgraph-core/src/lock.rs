//! Advisory file lock serializing catch-up runs across processes.
//!
//! SQLite already serializes writers, but two processes catching up the same
//! projection database would each read a batch and then race for the write
//! transaction. The lock file sits next to the database (`<db>.lock`).

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "{}: catch-up lock timed out after {waited:?} at {}",
        ErrorCode::LockContention,
        path.display()
    )]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::EventStoreFailure)]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::EventStoreFailure,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Path of the lock file guarding `db_path`.
#[must_use]
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// RAII guard for the exclusive catch-up lock. Released on drop.
#[derive(Debug)]
pub struct CatchUpLock {
    file: File,
    path: PathBuf,
}

impl CatchUpLock {
    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if another process holds the lock for longer
    /// than `timeout`, [`LockError::Io`] if the lock file cannot be created.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        while file.try_lock_exclusive().is_err() {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(Duration::from_millis(10));
        }
        tracing::debug!(
            path = %path.display(),
            waited_ms = start.elapsed().as_millis(),
            "acquired catch-up lock"
        );
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatchUpLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn lock_path_sits_next_to_the_database() {
        assert_eq!(
            lock_path_for(Path::new("/data/projection.db")),
            PathBuf::from("/data/projection.db.lock")
        );
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p.db.lock");
        let held = CatchUpLock::acquire(&path, Duration::from_millis(50)).expect("first");
        assert_eq!(held.path(), path.as_path());

        let err = CatchUpLock::acquire(&path, Duration::from_millis(20)).expect_err("held");
        assert!(matches!(&err, LockError::Timeout { path: p, .. } if p == &path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("p.db.lock");
        {
            let _first = CatchUpLock::acquire(&path, Duration::from_millis(50)).expect("first");
        }
        CatchUpLock::acquire(&path, Duration::from_millis(50)).expect("after release");
    }

    #[test]
    fn waiting_thread_gets_the_lock_after_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p.db.lock");
        let barrier = Arc::new(Barrier::new(2));

        let holder_path = path.clone();
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let _lock =
                CatchUpLock::acquire(&holder_path, Duration::from_millis(200)).expect("holder");
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(30));
        });

        barrier.wait();
        let lock = CatchUpLock::acquire(&path, Duration::from_secs(2));
        holder.join().expect("join");
        assert!(lock.is_ok());
    }
}
