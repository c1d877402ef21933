use chrono::Utc;
use dcb_core::{Cursor, ProcessorStatus, ProgressStore};
use dcb_postgres::{Error, Migrator, PgProgressStore};
use sqlx::PgPool;

#[sqlx::test]
async fn load_or_register_is_idempotent_and_defaults_to_active(pool: PgPool) -> sqlx::Result<()> {
    Migrator::new(&pool).run().await?;
    let store = PgProgressStore::new(pool);
    let now = Utc::now();

    let first = store.load_or_register("wallet-projector", "instance-a", now).await.expect("registers");
    assert_eq!(first.last_position, Cursor::ZERO);
    assert_eq!(first.status, ProcessorStatus::Active);

    let second = store.load_or_register("wallet-projector", "instance-b", now).await.expect("loads existing row");
    assert_eq!(second.instance_id, first.instance_id);
    Ok(())
}

#[sqlx::test]
async fn status_defaults_to_active_for_unknown_ids(pool: PgPool) -> sqlx::Result<()> {
    Migrator::new(&pool).run().await?;
    let store = PgProgressStore::new(pool);
    assert_eq!(store.status("never-seen").await.expect("status never errors"), ProcessorStatus::Active);
    Ok(())
}

#[sqlx::test]
async fn save_persists_position_and_status(pool: PgPool) -> sqlx::Result<()> {
    Migrator::new(&pool).run().await?;
    let store = PgProgressStore::new(pool);
    let now = Utc::now();

    let mut progress = store.load_or_register("wallet-projector", "instance-a", now).await.expect("registers");
    progress.last_position = Cursor::new(42);
    progress.status = ProcessorStatus::Paused;
    store.save(&progress).await.expect("save succeeds");

    assert_eq!(store.status("wallet-projector").await.expect("status reads back"), ProcessorStatus::Paused);
    Ok(())
}

#[sqlx::test]
async fn set_status_on_an_unregistered_processor_errors_instead_of_silently_succeeding(pool: PgPool) -> sqlx::Result<()> {
    Migrator::new(&pool).run().await?;
    let store = PgProgressStore::new(pool);

    let err = store
        .set_status("never-seen", ProcessorStatus::Paused)
        .await
        .expect_err("updating an unknown processor id is an error");
    assert!(matches!(err, Error::UnknownProcessor(id) if id == "never-seen"));
    Ok(())
}

#[sqlx::test]
async fn reset_errors_on_an_unregistered_processor_errors_instead_of_silently_succeeding(pool: PgPool) -> sqlx::Result<()> {
    Migrator::new(&pool).run().await?;
    let store = PgProgressStore::new(pool);

    let err = store
        .reset_errors("never-seen")
        .await
        .expect_err("resetting an unknown processor id is an error");
    assert!(matches!(err, Error::UnknownProcessor(id) if id == "never-seen"));
    Ok(())
}
