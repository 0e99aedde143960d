//! Lock-and-fetch driver around [`FetchSource`]

use crate::error::{RescacheError, RescacheResult};
use crate::lock::LockManager;
use crate::resource::fetch_source::{FetchOutcome, FetchSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 600;

/// Runs the full find, lock, create sequence for fetch sources
pub struct Fetcher {
    locks: Arc<dyn LockManager>,
    retry_interval: Duration,
    max_attempts: u32,
}

impl Fetcher {
    pub fn new(locks: Arc<dyn LockManager>) -> Self {
        Self {
            locks,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Wait between attempts at a contended lock
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Give up after this many contended attempts; 0 waits forever
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Fetch `source`, reusing a cache if one exists
    ///
    /// Only one caller per lock name runs the get; the rest wait for the lock
    /// and then find the cache it left behind.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        source: &FetchSource,
    ) -> RescacheResult<FetchOutcome> {
        if let Some(found) = source.find().await? {
            return Ok(FetchOutcome::cached(found));
        }

        let lock_name = source.lock_name()?;
        let mut attempts: u32 = 0;

        let lock = loop {
            if cancel.is_cancelled() {
                return Err(RescacheError::Cancelled);
            }

            attempts = attempts.saturating_add(1);
            if let Some(lock) = self.locks.try_acquire(&lock_name).await? {
                break lock;
            }

            if self.max_attempts != 0 && attempts >= self.max_attempts {
                return Err(RescacheError::LockTimeout {
                    name: lock_name,
                    attempts,
                });
            }

            debug!(lock_name = %lock_name, attempts, "waiting for lock");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RescacheError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        };

        let result = source.create(cancel, &lock).await;

        if let Err(e) = self.locks.release(&lock).await {
            warn!(lock_name = %lock_name, "failed to release lock: {}", e);
        }

        result
    }
}
