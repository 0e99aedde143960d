//! In-process lock manager

use crate::error::RescacheResult;
use crate::lock::{validate_name, Lock, LockManager, Unlock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Locks shared by tasks of a single process
#[derive(Debug, Default, Clone)]
pub struct MemoryLockManager {
    held: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, Uuid>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Unlock for MemoryLockManager {
    fn unlock(&self, name: &str, token: Uuid) -> RescacheResult<()> {
        let mut held = self.held();
        if held.get(name) == Some(&token) {
            held.remove(name);
            debug!(lock_name = name, "lock released");
        }
        Ok(())
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(&self, name: &str) -> RescacheResult<Option<Lock>> {
        validate_name(name)?;
        let mut held = self.held();

        if held.contains_key(name) {
            debug!(lock_name = name, "lock contended");
            return Ok(None);
        }

        let lock = Lock::new(name, Arc::new(self.clone()));
        held.insert(name.to_string(), lock.token());
        debug!(lock_name = name, "lock acquired");
        Ok(Some(lock))
    }

    async fn release(&self, lock: &Lock) -> RescacheResult<()> {
        if !lock.mark_released() {
            return Ok(());
        }
        self.unlock(lock.name(), lock.token())
    }
}
