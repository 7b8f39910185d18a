//! Advisory file locks shared between controller processes.
//!
//! Locks are `flock(2)` locks on a file next to the registry snapshot. The
//! kernel drops them when the holder exits, so a crashed controller never
//! leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// An exclusive lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Block until the lock at `path` is ours.
    pub async fn exclusive(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let lock = tokio::task::spawn_blocking(move || Self::acquire(path, true))
            .await
            .map_err(io::Error::other)??;
        lock.ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }

    /// Take the lock at `path` if nobody holds it.
    pub fn try_exclusive(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        Self::acquire(path.into(), false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(path: PathBuf, wait: bool) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !lock_file(&file, wait)? {
            return Ok(None);
        }
        Ok(Some(Self { path, _file: file }))
    }
}

#[cfg(unix)]
fn lock_file(file: &File, wait: bool) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let mut op = libc::LOCK_EX;
    if !wait {
        op |= libc::LOCK_NB;
    }
    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), op) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) => return Ok(false),
            _ => return Err(err),
        }
    }
}

// Single controller per state dir is assumed where flock is unavailable.
#[cfg(not(unix))]
fn lock_file(_file: &File, _wait: bool) -> io::Result<bool> {
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_try_exclusive_is_refused_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatcher.lock");

        let held = FileLock::try_exclusive(&path).unwrap().unwrap();
        assert!(FileLock::try_exclusive(&path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_exclusive(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json.lock");

        let held = FileLock::exclusive(&path).await.unwrap();
        let waiter = tokio::spawn({
            let path = path.clone();
            async move { FileLock::exclusive(path).await.map(|_| ()) }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }
}
