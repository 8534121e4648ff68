//! Cross-process lock around store updates
//!
//! The lock is a file created with `create_new`, so only one process can
//! hold it. It is removed on drop. A lock file older than `STALE_AFTER`
//! is left over from a crashed process and gets broken.

use super::StoreError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const RETRY_DELAY: Duration = Duration::from_millis(20);
const STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Block until the lock is held or `timeout` has passed
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let io_err = |source| StoreError::IoError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner pid is informational only
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!("Acquired store lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!("Breaking stale store lock {}", path.display());
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(io_err(e)),
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout {
                            path: path.to_path_buf(),
                            waited: started.elapsed(),
                        });
                    }
                    thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(io_err(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release store lock {}: {}", self.path.display(), e);
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("managed-vpn.lock");

        let lock = StoreLock::acquire(&path, Duration::from_secs(1)).unwrap();
        assert!(lock.path().exists());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_holder_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("managed-vpn.lock");

        let _held = StoreLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let result = StoreLock::acquire(&path, Duration::from_millis(100));

        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    }

    #[test]
    fn test_waits_for_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("managed-vpn.lock");

        let held = StoreLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let waiter = {
            let path = path.clone();
            thread::spawn(move || StoreLock::acquire(&path, Duration::from_secs(5)).is_ok())
        };
        thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_holders_never_overlap() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("managed-vpn.lock");
        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let inside = Arc::clone(&inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..10 {
                        let _lock = StoreLock::acquire(&path, Duration::from_secs(10)).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("managed-vpn.lock");
        let file = fs::File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        let lock = StoreLock::acquire(&path, Duration::from_millis(100));
        assert!(lock.is_ok());
    }
}
