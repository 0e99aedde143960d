//! Lock files shared by processes on one host
//!
//! A lock is held while `<dir>/<name>.lock` exists. Files are created with
//! `create_new`, so exactly one process wins. Lock files left behind by a
//! crashed holder are reclaimed once they are older than `stale_after`.
//! `stale_after` must exceed the longest expected fetch.
//!
//! Only reclaim and release remove lock files, and both run while holding
//! an exclusive advisory lock on `<dir>/.guard`. A lock file seen under the
//! guard therefore cannot be swapped for another holder's before it is
//! removed. File work runs on the blocking pool.

use crate::error::{RescacheError, RescacheResult};
use crate::lock::{validate_name, Lock, LockManager, Unlock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const GUARD_FILE: &str = ".guard";

/// Contents of a lock file
#[derive(Debug, Serialize, Deserialize)]
struct LockFile {
    token: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Lock manager backed by lock files in a directory
#[derive(Debug, Clone)]
pub struct FileLockManager {
    dir: PathBuf,
    stale_after: Option<Duration>,
}

impl FileLockManager {
    /// Locks in `dir`; `stale_after` of `None` never reclaims
    pub fn new(dir: impl Into<PathBuf>, stale_after: Option<Duration>) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    fn lock_error(name: &str, e: impl ToString) -> RescacheError {
        RescacheError::Lock {
            name: name.to_string(),
            reason: e.to_string(),
        }
    }

    /// Run `f` while holding the directory's exclusive guard
    fn guarded<T>(&self, name: &str, f: impl FnOnce() -> RescacheResult<T>) -> RescacheResult<T> {
        let guard = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(GUARD_FILE))
            .map_err(|e| Self::lock_error(name, e))?;
        FileExt::lock_exclusive(&guard).map_err(|e| Self::lock_error(name, e))?;

        // Closing the file drops the advisory lock.
        let result = f();
        drop(guard);
        result
    }

    /// Age of the lock file, `None` when it does not exist
    fn age(path: &Path) -> Option<Duration> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    fn read_token(path: &Path) -> Option<Uuid> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str::<LockFile>(&content)
            .ok()
            .map(|f| f.token)
    }

    /// Create the lock file; `None` when it already exists
    fn create(&self, name: &str) -> RescacheResult<Option<Lock>> {
        let path = self.lock_path(name);
        let mut file: File = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(Self::lock_error(name, e)),
        };

        let lock = Lock::new(name, Arc::new(self.clone()));
        let written = serde_json::to_vec(&LockFile {
            token: lock.token(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        })
        .map_err(RescacheError::from)
        .and_then(|contents| {
            file.write_all(&contents)
                .and_then(|()| file.flush())
                .map_err(|e| Self::lock_error(name, e))
        });
        if let Err(e) = written {
            // Nothing else removes a fresh lock file with no token.
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        debug!(lock_name = name, "lock acquired");
        Ok(Some(lock))
    }

    fn acquire_blocking(&self, name: &str) -> RescacheResult<Option<Lock>> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::lock_error(name, e))?;

        if let Some(lock) = self.create(name)? {
            return Ok(Some(lock));
        }
        let Some(stale_after) = self.stale_after else {
            debug!(lock_name = name, "lock contended");
            return Ok(None);
        };

        self.guarded(name, || {
            let path = self.lock_path(name);
            match Self::age(&path) {
                Some(age) if age > stale_after => {
                    warn!(lock_name = name, age_secs = age.as_secs(), "reclaiming stale lock file");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(Self::lock_error(name, e)),
                    }
                }
                Some(_) => {
                    debug!(lock_name = name, "lock contended");
                    return Ok(None);
                }
                None => {}
            }
            self.create(name)
        })
    }

    async fn blocking<T, F>(&self, name: &str, f: F) -> RescacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(FileLockManager, String) -> RescacheResult<T> + Send + 'static,
    {
        let manager = self.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || f(manager, owned))
            .await
            .map_err(|e| Self::lock_error(name, e))?
    }
}

impl Unlock for FileLockManager {
    fn unlock(&self, name: &str, token: Uuid) -> RescacheResult<()> {
        self.guarded(name, || {
            let path = self.lock_path(name);
            match Self::read_token(&path) {
                Some(held) if held == token => {
                    fs::remove_file(&path).map_err(|e| Self::lock_error(name, e))?;
                    debug!(lock_name = name, "lock released");
                }
                Some(_) => {
                    warn!(
                        lock_name = name,
                        "lock was reclaimed by another holder before release"
                    );
                }
                None => {}
            }
            Ok(())
        })
    }
}

#[async_trait]
impl LockManager for FileLockManager {
    async fn try_acquire(&self, name: &str) -> RescacheResult<Option<Lock>> {
        validate_name(name)?;
        self.blocking(name, |manager, name| manager.acquire_blocking(&name))
            .await
    }

    async fn release(&self, lock: &Lock) -> RescacheResult<()> {
        if !lock.mark_released() {
            return Ok(());
        }
        let token = lock.token();
        self.blocking(lock.name(), move |manager, name| manager.unlock(&name, token))
            .await
    }
}
