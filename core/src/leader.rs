//! Ensures at most one instance across a deployment actively processes a
//! given processor id at a time.
use async_trait::async_trait;

/// A per-processor exclusive lease backed by a session-scoped primitive
/// (e.g. a database advisory lock): its lifetime follows the holding
/// connection, so a crashed instance implicitly releases it and another
/// instance's next `try_acquire` succeeds — no handshake required.
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait]
pub trait LeaderElector: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Non-blocking attempt to acquire the lease for `processor_id` on
    /// behalf of `instance_id`.
    async fn try_acquire(&self, processor_id: &str, instance_id: &str) -> Result<bool, Self::Error>;

    /// Idempotent release; a no-op if the lease is not held.
    async fn release(&self, processor_id: &str) -> Result<(), Self::Error>;

    /// Snapshot query: does this instance currently believe it holds the
    /// lease for `processor_id`?
    async fn is_leader(&self, processor_id: &str) -> Result<bool, Self::Error>;
}
