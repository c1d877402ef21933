//! Schema initialization for a fresh deployment.
//!
//! Every statement is `IF NOT EXISTS`, so running the migrator against an
//! already-initialized database is a no-op. Intended to run once at startup
//! or from a dedicated administrative binary, not on every connection.
use sqlx::PgPool;

/// Runs the `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS`
/// statements for the event, command and processor-progress tables.
pub struct Migrator<'a> {
    pool: &'a PgPool,
}

impl<'a> Migrator<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn run(&self) -> Result<(), sqlx::Error> {
        sqlx::query(include_str!("sql/table_event.sql"))
            .execute(self.pool)
            .await?;
        sqlx::query(include_str!("sql/idx_event_type.sql"))
            .execute(self.pool)
            .await?;
        sqlx::query(include_str!("sql/idx_event_tags.sql"))
            .execute(self.pool)
            .await?;
        sqlx::query(include_str!("sql/table_command.sql"))
            .execute(self.pool)
            .await?;
        sqlx::query(include_str!("sql/table_processor_progress.sql"))
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
