//! Distributed Lease Lock
//!
//! Mutual exclusion keyed by an arbitrary string (the payee account id for
//! transfer creation). Leases expire on their own, so a crashed holder only
//! blocks the key for `ttl`. A `false` from [`DistributedLock::release`] means
//! the lease expired and may have been taken over; callers log it and rely on
//! downstream idempotency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::error::PayoutError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Proof of a held lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take the lease if free or expired
    async fn try_acquire(&self, key: &str, ttl: Duration)
    -> Result<Option<LockHandle>, PayoutError>;

    /// Drop the lease; false if it was no longer ours
    async fn release(&self, handle: &LockHandle) -> Result<bool, PayoutError>;
}

/// Poll `try_acquire` until the lease is taken or `wait` elapses
pub async fn acquire_with_wait(
    lock: &Arc<dyn DistributedLock>,
    key: &str,
    ttl: Duration,
    wait: Duration,
) -> Result<LockHandle, PayoutError> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if let Some(handle) = lock.try_acquire(key, ttl).await? {
            return Ok(handle);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PayoutError::LockBusy(key.to_string()));
        }
        debug!(lock_key = key, "Lock held elsewhere, waiting");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn lease_expiry(ttl: Duration) -> Result<DateTime<Utc>, PayoutError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| PayoutError::InvalidRequest(format!("Invalid lock ttl: {}", e)))?;
    Ok(Utc::now() + ttl)
}

/// Lease lock on the `payout_locks_tb` table
pub struct PgLeaseLock {
    pool: PgPool,
}

impl PgLeaseLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedLock for PgLeaseLock {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, PayoutError> {
        let token = Uuid::new_v4();
        let expires_at = lease_expiry(ttl)?;

        // Only an expired lease can be stolen
        let result = sqlx::query(
            r#"
            INSERT INTO payout_locks_tb (lock_key, token, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO UPDATE
            SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
            WHERE payout_locks_tb.expires_at < NOW()
            "#,
        )
        .bind(key)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
            expires_at,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, PayoutError> {
        let result = sqlx::query("DELETE FROM payout_locks_tb WHERE lock_key = $1 AND token = $2")
            .bind(&handle.key)
            .bind(handle.token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryLock;
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let lock = MemoryLock::new();
        let ttl = Duration::from_secs(30);

        let handle = lock.try_acquire("payee:1", ttl).await.unwrap().unwrap();
        assert!(lock.try_acquire("payee:1", ttl).await.unwrap().is_none());
        assert!(lock.try_acquire("payee:2", ttl).await.unwrap().is_some());

        assert!(lock.release(&handle).await.unwrap());
        assert!(lock.try_acquire("payee:1", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_stolen() {
        let lock = MemoryLock::new();
        let ttl = Duration::from_secs(30);

        let first = lock.try_acquire("payee:1", ttl).await.unwrap().unwrap();
        lock.expire("payee:1");
        let second = lock.try_acquire("payee:1", ttl).await.unwrap().unwrap();
        assert_ne!(first.token, second.token);

        // The original holder lost its lease
        assert!(!lock.release(&first).await.unwrap());
        assert!(lock.release(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_with_wait_times_out() {
        let lock: Arc<dyn DistributedLock> = Arc::new(MemoryLock::new());
        let ttl = Duration::from_secs(30);

        let _held = lock.try_acquire("payee:1", ttl).await.unwrap().unwrap();
        let result =
            acquire_with_wait(&lock, "payee:1", ttl, Duration::from_millis(120)).await;
        assert!(matches!(result, Err(PayoutError::LockBusy(key)) if key == "payee:1"));
    }
}
