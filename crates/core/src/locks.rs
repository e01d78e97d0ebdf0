use crate::error::StoreError;
use crate::traits::LockService;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// In-process named lease table. A lease self-expires after its TTL, so a
/// holder that crashed mid-processing cannot wedge a key forever; the happy
/// path still releases explicitly. A distributed lock service can be swapped
/// in through the `LockService` trait.
#[derive(Default)]
pub struct LeaseLock {
    leases: Mutex<HashMap<String, Instant>>,
}

impl LeaseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for LeaseLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        leases.retain(|_, expires_at| *expires_at > now);

        if leases.contains_key(key) {
            return Ok(false);
        }
        leases.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<(), StoreError> {
        self.leases.lock().await.remove(key);
        Ok(())
    }
}
