//! User-supplied reaction to a batch of fetched events.
use async_trait::async_trait;

use crate::event::PersistedEvent;

/// Handles a batch of events for one processor cycle. Must be idempotent
/// with respect to event position, since the runtime advances progress
/// using the batch's maximum position regardless of the handled count and
/// offers at-least-once delivery on progress-update failure.
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the number of events actually handled; the runtime does not
    /// require this to equal the batch length.
    async fn handle(&self, processor_id: &str, events: &[PersistedEvent]) -> Result<usize, Self::Error>;
}
