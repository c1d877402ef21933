//! Session-scoped leader election via Postgres advisory locks.
//!
//! Each `try_acquire` pulls a dedicated connection out of the pool and
//! holds it in `held` for as long as the lease is wanted; the lock is tied
//! to that connection's backend session, so if the instance crashes (or
//! simply drops the connection) Postgres releases the lock on its own —
//! there is no heartbeat or expiry to manage.
use std::collections::HashMap;

use async_trait::async_trait;
use md5::{Digest, Md5};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;

use dcb_core::LeaderElector;

use crate::error::Error;

fn lock_key(processor_id: &str) -> i64 {
    let digest = Md5::digest(processor_id.as_bytes());
    i64::from_be_bytes(digest[0..8].try_into().expect("md5 digest is at least 8 bytes"))
}

/// `dcb_core::LeaderElector` backed by `pg_try_advisory_lock`/
/// `pg_advisory_unlock`.
pub struct PgLeaderElector {
    pool: PgPool,
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgLeaderElector {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaderElector for PgLeaderElector {
    type Error = Error;

    async fn try_acquire(&self, processor_id: &str, _instance_id: &str) -> Result<bool, Self::Error> {
        let mut held = self.held.lock().await;
        if held.contains_key(processor_id) {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock_key(processor_id))
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            held.insert(processor_id.to_string(), conn);
        }
        Ok(acquired)
    }

    async fn release(&self, processor_id: &str) -> Result<(), Self::Error> {
        let mut held = self.held.lock().await;
        if let Some(mut conn) = held.remove(processor_id) {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(lock_key(processor_id))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn is_leader(&self, processor_id: &str) -> Result<bool, Self::Error> {
        Ok(self.held.lock().await.contains_key(processor_id))
    }
}
