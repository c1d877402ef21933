//! PostgreSQL-backed `EventStore`.
//!
//! Reads go through a (possibly replica-pointed) read pool; conditional
//! appends and `execute_in_transaction` go through the write pool inside a
//! transaction opened at the caller's requested `TransactionIsolation`
//! (`READ COMMITTED` by default, per `ExecutorConfig`), so the
//! idempotency/cursor checks below and the insert they guard are atomic
//! with respect to any concurrently committing transaction at that level.
use std::future::Future;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::Mutex;

use dcb_core::{
    AppendCondition, AppendError, Cursor, EventStore, EventStoreTransaction, NewCommand, NewEvent, PersistedEvent, Query, Tag,
    TransactionIsolation,
};

use crate::error::{map_serialization_error, Error};
use crate::query_builder::push_criteria;

fn isolation_sql(isolation: TransactionIsolation) -> &'static str {
    match isolation {
        TransactionIsolation::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
        TransactionIsolation::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
        TransactionIsolation::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
    }
}

async fn fetch_rows<'a, E>(
    executor: E,
    query: &'a Query,
    after: Cursor,
) -> Result<Vec<PersistedEvent>, Error>
where
    E: sqlx::PgExecutor<'a>,
{
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT position, transaction_id, event_type, tags, data, occurred_at FROM event WHERE ",
    );
    push_criteria(&mut builder, query, after);
    builder.push(" ORDER BY position ASC");

    let rows = builder.build().fetch_all(executor).await?;
    rows.into_iter().map(row_to_event).collect()
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<PersistedEvent, Error> {
    let position: i64 = row.try_get("position")?;
    let transaction_id: i64 = row.try_get("transaction_id")?;
    let event_type: String = row.try_get("event_type")?;
    let raw_tags: Vec<String> = row.try_get("tags")?;
    let data: Vec<u8> = row.try_get("data")?;
    let occurred_at = row.try_get("occurred_at")?;

    let tags = raw_tags
        .iter()
        .map(|t| Tag::parse(t))
        .collect::<Result<Vec<Tag>, _>>()
        .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))?;

    Ok(PersistedEvent {
        position: Cursor::new(position),
        transaction_id: transaction_id.to_string(),
        event_type,
        tags,
        payload: data,
        occurred_at,
    })
}

async fn insert_events<'a, E>(
    executor: E,
    events: Vec<NewEvent>,
    transaction_id: &str,
) -> Result<Vec<PersistedEvent>, Error>
where
    E: sqlx::PgExecutor<'a>,
{
    let now = Utc::now();
    let tx_id: i64 = transaction_id.parse().unwrap_or(0);

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO event (transaction_id, event_type, tags, data, occurred_at) ");
    builder.push_values(&events, |mut b, event| {
        b.push_bind(tx_id);
        b.push_bind(event.event_type.clone());
        b.push_bind(event.tags.iter().map(Tag::canonical).collect::<Vec<String>>());
        b.push_bind(event.payload.clone());
        b.push_bind(now);
    });
    builder.push(" RETURNING position");

    let positions: Vec<i64> = builder
        .build()
        .fetch_all(executor)
        .await?
        .into_iter()
        .map(|r| r.get(0))
        .collect();

    Ok(positions
        .into_iter()
        .zip(events)
        .map(|(position, event)| PersistedEvent {
            position: Cursor::new(position),
            transaction_id: transaction_id.to_string(),
            event_type: event.event_type,
            tags: event.tags,
            payload: event.payload,
            occurred_at: now,
        })
        .collect())
}

async fn check_exists<'a, E>(executor: E, query: &'a Query, after: Cursor) -> Result<Option<Cursor>, Error>
where
    E: sqlx::PgExecutor<'a>,
{
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT MIN(position) FROM event WHERE ");
    push_criteria(&mut builder, query, after);

    let conflict: Option<i64> = builder.build_query_scalar().fetch_one(executor).await?;
    Ok(conflict.map(Cursor::new))
}

/// A single `sqlx::Transaction`-scoped handle. Locking around the
/// transaction is required because `EventStoreTransaction`'s methods take
/// `&self` (so several command-handler reads can share the handle) while
/// `sqlx::Transaction` needs `&mut` access for every query. The `Arc` lets
/// `execute_in_transaction` retain a handle to commit once the closure it
/// handed this value to has returned.
pub struct PgEventStoreTransaction {
    tx: Arc<Mutex<Option<sqlx::Transaction<'static, Postgres>>>>,
    transaction_id: String,
}

impl PgEventStoreTransaction {
    async fn with_tx<F, Fut, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut sqlx::Transaction<'static, Postgres>) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().expect("transaction used after commit");
        f(tx).await
    }
}

#[async_trait]
impl EventStoreTransaction for PgEventStoreTransaction {
    type Error = Error;

    fn stream<'a>(&'a self, query: &'a Query, after: Cursor) -> BoxStream<'a, Result<PersistedEvent, Self::Error>> {
        stream! {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().expect("transaction used after commit");
            let events = fetch_rows(&mut **tx, query, after).await?;
            for event in events {
                yield Ok(event);
            }
        }
        .boxed()
    }

    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error> {
        let transaction_id = self.transaction_id.clone();
        self.with_tx(|tx| async move { insert_events(&mut **tx, events, &transaction_id).await })
            .await
    }

    async fn append_if(&self, events: Vec<NewEvent>, condition: AppendCondition) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().expect("transaction used after commit");
        do_append_if(tx, events, condition, &self.transaction_id).await
    }

    async fn store_command(&self, command: NewCommand) -> Result<(), Self::Error> {
        let now = Utc::now();
        let tx_id: i64 = self.transaction_id.parse().unwrap_or(0);
        self.with_tx(|tx| async move {
            sqlx::query("INSERT INTO command (command_type, transaction_id, payload, recorded_at) VALUES ($1, $2, $3, $4)")
                .bind(command.command_type)
                .bind(tx_id)
                .bind(command.payload)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
        .await
    }

    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

/// Runs the idempotency-then-cursor check described in
/// `dcb_core::AppendCondition` against an already-open transaction, then
/// performs the insert if the condition still holds. Idempotency is
/// checked first: it doesn't need the handler's cursor and a duplicate
/// should never be reported as a plain concurrency conflict.
async fn do_append_if(
    tx: &mut sqlx::Transaction<'static, Postgres>,
    events: Vec<NewEvent>,
    condition: AppendCondition,
    transaction_id: &str,
) -> Result<Vec<PersistedEvent>, AppendError<Error>> {
    if let Some(idempotency_query) = condition.idempotency_query() {
        if let Some(position) = check_exists(&mut **tx, idempotency_query, Cursor::ZERO)
            .await
            .map_err(AppendError::Storage)?
        {
            return Err(AppendError::DuplicateOperation {
                conflicting_position: position,
            });
        }
    }

    if !condition.state_change_query().is_empty() {
        if let Some(position) = check_exists(&mut **tx, condition.state_change_query(), condition.cursor_value())
            .await
            .map_err(AppendError::Storage)?
        {
            return Err(AppendError::ConcurrencyConflict { cursor: position });
        }
    }

    insert_events(&mut **tx, events, transaction_id)
        .await
        .map_err(AppendError::Storage)
}

/// `dcb_core::EventStore` backed by a pair of Postgres pools: `read_pool`
/// (may point at a replica) for `stream`/`max_position`, `write_pool` (must
/// point at the primary) for everything that appends.
#[derive(Clone)]
pub struct PgEventStore {
    read_pool: PgPool,
    write_pool: PgPool,
}

impl PgEventStore {
    /// Uses the same pool for both reads and writes.
    pub fn new(pool: PgPool) -> Self {
        Self {
            read_pool: pool.clone(),
            write_pool: pool,
        }
    }

    /// Splits reads and writes across two pools, e.g. a replica and the
    /// primary.
    pub fn with_pools(read_pool: PgPool, write_pool: PgPool) -> Self {
        Self { read_pool, write_pool }
    }

    pub fn write_pool(&self) -> &PgPool {
        &self.write_pool
    }

    pub fn read_pool(&self) -> &PgPool {
        &self.read_pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    type Error = Error;
    type Transaction = PgEventStoreTransaction;

    fn stream<'a>(&'a self, query: &'a Query, after: Cursor) -> BoxStream<'a, Result<PersistedEvent, Self::Error>> {
        stream! {
            let events = fetch_rows(&self.read_pool, query, after).await?;
            for event in events {
                yield Ok(event);
            }
        }
        .boxed()
    }

    async fn max_position(&self) -> Result<Cursor, Self::Error> {
        let position: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM event")
            .fetch_one(&self.read_pool)
            .await?;
        Ok(position.map(Cursor::new).unwrap_or(Cursor::ZERO))
    }

    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error> {
        let mut tx = self.write_pool.begin().await?;
        let transaction_id = current_transaction_id(&mut tx).await?;
        let persisted = insert_events(&mut *tx, events, &transaction_id).await?;
        tx.commit().await.map_err(map_serialization_error)?;
        Ok(persisted)
    }

    async fn append_if(
        &self,
        events: Vec<NewEvent>,
        condition: AppendCondition,
        isolation: TransactionIsolation,
    ) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>> {
        let mut tx = self.write_pool.begin().await.map_err(Error::from)?;
        sqlx::query(isolation_sql(isolation))
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        let transaction_id = current_transaction_id(&mut tx).await.map_err(Error::from)?;

        let persisted = do_append_if(&mut tx, events, condition, &transaction_id).await?;

        tx.commit().await.map_err(map_serialization_error)?;
        Ok(persisted)
    }

    async fn execute_in_transaction<F, Fut, T, E>(&self, isolation: TransactionIsolation, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<AppendError<Self::Error>> + Send,
    {
        let mut raw_tx = self
            .write_pool
            .begin()
            .await
            .map_err(|e| E::from(AppendError::Storage(Error::from(e))))?;
        sqlx::query(isolation_sql(isolation))
            .execute(&mut *raw_tx)
            .await
            .map_err(|e| E::from(AppendError::Storage(Error::from(e))))?;
        let transaction_id = current_transaction_id(&mut raw_tx)
            .await
            .map_err(|e| E::from(AppendError::Storage(e)))?;

        let shared = Arc::new(Mutex::new(Some(raw_tx)));
        let tx = PgEventStoreTransaction {
            tx: Arc::clone(&shared),
            transaction_id,
        };

        // `f` consumes `tx` without handing the raw transaction back, so the
        // only way to commit it afterwards is through the `Arc` we kept.
        let result = f(tx).await;

        match result {
            Ok(value) => {
                let raw_tx = shared
                    .lock()
                    .await
                    .take()
                    .expect("transaction still present after f returns");
                raw_tx
                    .commit()
                    .await
                    .map_err(|e| E::from(AppendError::Storage(map_serialization_error(e))))?;
                Ok(value)
            }
            // Dropping `shared` here rolls the transaction back; `f`'s own
            // error already carries whatever it needs to report.
            Err(err) => Err(err),
        }
    }
}

async fn current_transaction_id(tx: &mut sqlx::Transaction<'static, Postgres>) -> Result<String, Error> {
    let id: i64 = sqlx::query_scalar("SELECT pg_current_xact_id()::text::bigint")
        .fetch_one(&mut **tx)
        .await?;
    Ok(id.to_string())
}
