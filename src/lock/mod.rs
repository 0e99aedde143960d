//! Named fetch locks with try-acquire semantics
//!
//! A lock is scoped to one (resource instance, worker) pair. Acquisition
//! never blocks: callers decide whether to wait, retry, or give up. A
//! [`Lock`] dropped without an explicit release is released on drop.

mod file;
mod memory;

pub use file::FileLockManager;
pub use memory::MemoryLockManager;

use crate::error::{RescacheError, RescacheResult};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Synchronous release used when a [`Lock`] is dropped while still held
trait Unlock: Debug + Send + Sync {
    fn unlock(&self, name: &str, token: Uuid) -> RescacheResult<()>;
}

/// Handle to an acquired lock
///
/// Proof of ownership for [`FetchSource::create`](crate::resource::FetchSource::create).
#[derive(Debug)]
pub struct Lock {
    name: String,
    token: Uuid,
    held: AtomicBool,
    owner: Arc<dyn Unlock>,
}

impl Lock {
    fn new(name: impl Into<String>, owner: Arc<dyn Unlock>) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4(),
            held: AtomicBool::new(true),
            owner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique token of this acquisition
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Whether the lock has not been released yet
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Mark released; returns whether it was still held
    fn mark_released(&self) -> bool {
        self.held.swap(false, Ordering::AcqRel)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.mark_released() {
            return;
        }
        match self.owner.unlock(&self.name, self.token) {
            Ok(()) => warn!(lock_name = %self.name, "lock released on drop"),
            Err(e) => warn!(lock_name = %self.name, "failed to release dropped lock: {}", e),
        }
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire `name` if nobody holds it; `None` when contended
    async fn try_acquire(&self, name: &str) -> RescacheResult<Option<Lock>>;

    /// Release a lock; releasing twice is a no-op
    async fn release(&self, lock: &Lock) -> RescacheResult<()>;
}

/// Lock names become file names, so they must be plain tokens
fn validate_name(name: &str) -> RescacheResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RescacheError::Lock {
            name: name.to_string(),
            reason: "invalid lock name".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingOwner(AtomicUsize);

    impl Unlock for CountingOwner {
        fn unlock(&self, _name: &str, _token: Uuid) -> RescacheResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn lock_release_flag() {
        let owner = Arc::new(CountingOwner::default());
        let lock = Lock::new("abc", owner.clone());
        assert!(lock.is_held());
        assert!(lock.mark_released());
        assert!(!lock.is_held());
        assert!(!lock.mark_released());

        drop(lock);
        assert_eq!(owner.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_lock_unlocks_once() {
        let owner = Arc::new(CountingOwner::default());
        drop(Lock::new("abc", owner.clone()));
        assert_eq!(owner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("3f2a9c").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name(".hidden").is_err());
    }
}
