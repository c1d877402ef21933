//! Per-processor persisted position, status and error count.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cursor::Cursor;

/// Where a processor currently stands relative to the cycle described in
/// `crate::processor::runtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    Active,
    Paused,
    Failed,
}

/// The persisted state of a single processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorProgress {
    pub processor_id: String,
    pub last_position: Cursor,
    pub status: ProcessorStatus,
    pub error_count: u32,
    pub instance_id: String,
    pub updated_at: DateTime<Utc>,
}

impl ProcessorProgress {
    /// The row a processor gets on its very first cycle: position zero,
    /// active, no errors, owned by whichever instance won the race to
    /// insert it.
    pub fn new(processor_id: impl Into<String>, instance_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            processor_id: processor_id.into(),
            last_position: Cursor::ZERO,
            status: ProcessorStatus::Active,
            error_count: 0,
            instance_id: instance_id.into(),
            updated_at: now,
        }
    }
}

/// Durable storage for `ProcessorProgress` rows, implemented by the
/// storage backend. Auto-registration (inserting a fresh row the first
/// time a processor id is seen) is the implementation's responsibility.
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads progress for `processor_id`, auto-registering it (position 0,
    /// `ACTIVE`) if this is the first time it has been seen.
    async fn load_or_register(
        &self,
        processor_id: &str,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessorProgress, Self::Error>;

    async fn save(&self, progress: &ProcessorProgress) -> Result<(), Self::Error>;

    /// Returns `ACTIVE` by default for ids this store has never seen — a
    /// deliberately preserved quirk, see design notes.
    async fn status(&self, processor_id: &str) -> Result<ProcessorStatus, Self::Error>;

    async fn set_status(&self, processor_id: &str, status: ProcessorStatus) -> Result<(), Self::Error>;

    async fn reset_errors(&self, processor_id: &str) -> Result<(), Self::Error>;
}
