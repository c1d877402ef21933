//! The storage-agnostic event store contract.
//!
//! Implementations (e.g. the Postgres backend) own durability; this trait
//! only fixes the shape every backend must expose: an append-only, tag- and
//! type-filterable stream, optimistic-concurrency appends, and a
//! transaction scope for atomically combining a read-derived decision with
//! its resulting append.
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;

use crate::append_condition::AppendCondition;
use crate::cursor::Cursor;
use crate::event::{NewCommand, NewEvent, PersistedEvent};
use crate::query::Query;

/// Isolation level a backend should run a transaction-scoped operation at.
/// Only backends with a real transaction concept (e.g. Postgres) need to
/// act on this; an in-memory double is free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionIsolation {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Failure modes an append can hit beyond the backing storage's own errors.
#[derive(thiserror::Error, Debug)]
pub enum AppendError<E> {
    #[error("concurrency conflict: an event matching the append condition was recorded after cursor {cursor}")]
    ConcurrencyConflict { cursor: Cursor },

    #[error("duplicate operation: an event already matches the idempotency condition")]
    DuplicateOperation { conflicting_position: Cursor },

    #[error(transparent)]
    Storage(#[from] E),
}

/// Read and write access scoped to a single backend transaction, handed to
/// the closure passed to `EventStore::execute_in_transaction`.
#[async_trait]
pub trait EventStoreTransaction: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn stream<'a>(
        &'a self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<PersistedEvent, Self::Error>>;

    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error>;

    async fn append_if(
        &self,
        events: Vec<NewEvent>,
        condition: AppendCondition,
    ) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>>;

    async fn store_command(&self, command: NewCommand) -> Result<(), Self::Error>;

    /// The backend transaction identifier events appended in this scope
    /// will carry (e.g. Postgres's current transaction id).
    fn transaction_id(&self) -> &str;
}

/// The store every command handler, projector and processor is written
/// against.
#[async_trait]
pub trait EventStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Transaction: EventStoreTransaction<Error = Self::Error>;

    /// Streams persisted events matching `query`, strictly after `after`, in
    /// position order.
    fn stream<'a>(
        &'a self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<PersistedEvent, Self::Error>>;

    /// The position of the most recently appended event, or `Cursor::ZERO`
    /// if the store is empty.
    async fn max_position(&self) -> Result<Cursor, Self::Error>;

    /// Appends events unconditionally.
    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error>;

    /// Appends events only if `condition` still holds. `isolation` governs
    /// the transaction the check-then-insert runs in.
    async fn append_if(
        &self,
        events: Vec<NewEvent>,
        condition: AppendCondition,
        isolation: TransactionIsolation,
    ) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>>;

    /// Runs `f` against a single backend transaction, opened at `isolation`:
    /// every read and write `f` performs through the handed transaction
    /// either all commit or all roll back together. `f`'s error type only
    /// needs to know how to absorb an `AppendError`, so callers layered on
    /// top (like the command executor) can thread their own error taxonomy
    /// through unchanged.
    async fn execute_in_transaction<F, Fut, T, E>(&self, isolation: TransactionIsolation, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<AppendError<Self::Error>> + Send;
}
