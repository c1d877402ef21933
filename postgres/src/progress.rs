//! `ProgressStore` against the `processor_progress` table.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use dcb_core::{Cursor, ProcessorProgress, ProcessorStatus, ProgressStore};

use crate::error::Error;

fn status_str(status: ProcessorStatus) -> &'static str {
    match status {
        ProcessorStatus::Active => "ACTIVE",
        ProcessorStatus::Paused => "PAUSED",
        ProcessorStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> ProcessorStatus {
    match s {
        "PAUSED" => ProcessorStatus::Paused,
        "FAILED" => ProcessorStatus::Failed,
        _ => ProcessorStatus::Active,
    }
}

pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    type Error = Error;

    async fn load_or_register(
        &self,
        processor_id: &str,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessorProgress, Self::Error> {
        let row = sqlx::query_as::<_, (i64, String, i32, String, DateTime<Utc>)>(
            "INSERT INTO processor_progress (processor_id, last_position, status, error_count, instance_id, updated_at)
             VALUES ($1, 0, 'ACTIVE', 0, $2, $3)
             ON CONFLICT (processor_id) DO UPDATE SET processor_id = EXCLUDED.processor_id
             RETURNING last_position, status, error_count, instance_id, updated_at",
        )
        .bind(processor_id)
        .bind(instance_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let (last_position, status, error_count, instance_id, updated_at) = row;
        Ok(ProcessorProgress {
            processor_id: processor_id.to_string(),
            last_position: Cursor::new(last_position),
            status: parse_status(&status),
            error_count: error_count as u32,
            instance_id,
            updated_at,
        })
    }

    async fn save(&self, progress: &ProcessorProgress) -> Result<(), Self::Error> {
        sqlx::query(
            "UPDATE processor_progress
             SET last_position = $2, status = $3, error_count = $4, instance_id = $5, updated_at = $6
             WHERE processor_id = $1",
        )
        .bind(&progress.processor_id)
        .bind(progress.last_position.position())
        .bind(status_str(progress.status))
        .bind(progress.error_count as i32)
        .bind(&progress.instance_id)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn status(&self, processor_id: &str) -> Result<ProcessorStatus, Self::Error> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM processor_progress WHERE processor_id = $1")
            .bind(processor_id)
            .fetch_optional(&self.pool)
            .await?;
        // Unknown ids default to ACTIVE: a processor that has never run has
        // never been paused or failed either.
        Ok(status.map(|s| parse_status(&s)).unwrap_or(ProcessorStatus::Active))
    }

    async fn set_status(&self, processor_id: &str, status: ProcessorStatus) -> Result<(), Self::Error> {
        let result = sqlx::query("UPDATE processor_progress SET status = $2 WHERE processor_id = $1")
            .bind(processor_id)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::UnknownProcessor(processor_id.to_string()));
        }
        Ok(())
    }

    async fn reset_errors(&self, processor_id: &str) -> Result<(), Self::Error> {
        let result = sqlx::query("UPDATE processor_progress SET error_count = 0 WHERE processor_id = $1")
            .bind(processor_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::UnknownProcessor(processor_id.to_string()));
        }
        Ok(())
    }
}
