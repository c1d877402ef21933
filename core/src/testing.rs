//! An in-memory event store for unit tests, and a `given/when/then` harness
//! for testing command handlers without a database.
//!
//! The in-memory store is a simplified test double: appends take effect
//! immediately rather than being buffered until a transaction commits, so
//! it does not model rollback-on-error. That is fine for handler unit
//! tests, which only care about the store's state after a successful or
//! rejected append, never about mid-transaction visibility.
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use tokio::sync::Mutex;

use crate::append_condition::AppendCondition;
use crate::command_executor::{Command, CommandExecutor, CommandHandler, ExecutionResult, ExecutorConfig, ExecutorError};
use crate::cursor::Cursor;
use crate::event::{NewCommand, NewEvent, PersistedEvent};
use crate::event_store::{AppendError, EventStore, EventStoreTransaction, TransactionIsolation};
use crate::query::Query;

#[derive(Default)]
struct State {
    events: Vec<PersistedEvent>,
    commands: Vec<NewCommand>,
    next_transaction_id: u64,
}

impl State {
    fn append(&mut self, events: Vec<NewEvent>, transaction_id: &str) -> Vec<PersistedEvent> {
        let now = Utc::now();
        let persisted: Vec<PersistedEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, e)| PersistedEvent {
                position: Cursor::new(self.events.len() as i64 + i as i64 + 1),
                transaction_id: transaction_id.to_string(),
                event_type: e.event_type,
                tags: e.tags,
                payload: e.payload,
                occurred_at: now,
            })
            .collect();
        self.events.extend(persisted.clone());
        persisted
    }

    fn check_condition(&self, condition: &AppendCondition) -> Result<(), AppendError<Infallible>> {
        if let Some(idempotency_query) = condition.idempotency_query() {
            if let Some(conflict) = self
                .events
                .iter()
                .find(|e| idempotency_query.matches(&e.event_type, &e.tags))
            {
                return Err(AppendError::DuplicateOperation {
                    conflicting_position: conflict.position,
                });
            }
        }
        if !condition.state_change_query().is_empty() {
            if let Some(conflict) = self.events.iter().find(|e| {
                e.position > condition.cursor_value() && condition.state_change_query().matches(&e.event_type, &e.tags)
            }) {
                return Err(AppendError::ConcurrencyConflict {
                    cursor: conflict.position,
                });
            }
        }
        Ok(())
    }
}

/// An in-memory, single-process `EventStore` for unit tests.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with events, unconditionally, as if appended before
    /// the test began.
    pub async fn seed(&self, events: Vec<NewEvent>) {
        let mut state = self.state.lock().await;
        let transaction_id = format!("t{}", state.next_transaction_id);
        state.next_transaction_id += 1;
        state.append(events, &transaction_id);
    }
}

/// A transaction-scoped handle into an `InMemoryEventStore`.
pub struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    transaction_id: String,
}

#[async_trait]
impl EventStoreTransaction for InMemoryTransaction {
    type Error = Infallible;

    fn stream<'a>(&'a self, query: &'a Query, after: Cursor) -> BoxStream<'a, Result<PersistedEvent, Self::Error>> {
        let events = self
            .state
            .try_lock()
            .map(|state| state.events.clone())
            .unwrap_or_default();
        Box::pin(stream_into_owned(events, query.clone(), after))
    }

    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error> {
        let mut state = self.state.lock().await;
        Ok(state.append(events, &self.transaction_id))
    }

    async fn append_if(&self, events: Vec<NewEvent>, condition: AppendCondition) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>> {
        let mut state = self.state.lock().await;
        state.check_condition(&condition)?;
        Ok(state.append(events, &self.transaction_id))
    }

    async fn store_command(&self, command: NewCommand) -> Result<(), Self::Error> {
        self.state.lock().await.commands.push(command);
        Ok(())
    }

    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    type Error = Infallible;
    type Transaction = InMemoryTransaction;

    fn stream<'a>(&'a self, _query: &'a Query, _after: Cursor) -> BoxStream<'a, Result<PersistedEvent, Self::Error>> {
        // Blocking-free snapshot: acquire the lock synchronously via
        // try_lock, which always succeeds here since tests are single
        // writer at a time and never hold the lock across an await while
        // streaming.
        let events = self
            .state
            .try_lock()
            .map(|state| state.events.clone())
            .unwrap_or_default();
        Box::pin(stream_into_owned(events, _query.clone(), _after))
    }

    async fn max_position(&self) -> Result<Cursor, Self::Error> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .last()
            .map(|e| e.position)
            .unwrap_or(Cursor::ZERO))
    }

    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<PersistedEvent>, Self::Error> {
        let mut state = self.state.lock().await;
        let transaction_id = format!("t{}", state.next_transaction_id);
        state.next_transaction_id += 1;
        Ok(state.append(events, &transaction_id))
    }

    async fn append_if(
        &self,
        events: Vec<NewEvent>,
        condition: AppendCondition,
        _isolation: TransactionIsolation,
    ) -> Result<Vec<PersistedEvent>, AppendError<Self::Error>> {
        let mut state = self.state.lock().await;
        state.check_condition(&condition)?;
        let transaction_id = format!("t{}", state.next_transaction_id);
        state.next_transaction_id += 1;
        Ok(state.append(events, &transaction_id))
    }

    async fn execute_in_transaction<F, Fut, T, E>(&self, _isolation: TransactionIsolation, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<AppendError<Self::Error>> + Send,
    {
        let transaction_id = {
            let mut state = self.state.lock().await;
            let id = format!("t{}", state.next_transaction_id);
            state.next_transaction_id += 1;
            id
        };
        let tx = InMemoryTransaction {
            state: Arc::clone(&self.state),
            transaction_id,
        };
        f(tx).await
    }
}

fn stream_into_owned(events: Vec<PersistedEvent>, query: Query, after: Cursor) -> impl futures::Stream<Item = Result<PersistedEvent, Infallible>> {
    stream::iter(
        events
            .into_iter()
            .filter(move |e| e.position > after && query.matches(&e.event_type, &e.tags))
            .map(Ok),
    )
}

/// `given().when().then()` harness for testing a single `CommandHandler` in
/// isolation, without a database.
pub struct TestHarness;

pub struct Given {
    store: InMemoryEventStore,
}

pub struct When<C, ES: EventStore> {
    store: InMemoryEventStore,
    result: Result<ExecutionResult, ExecutorError<ES::Error>>,
    _marker: std::marker::PhantomData<C>,
}

impl TestHarness {
    pub async fn given(history: Vec<NewEvent>) -> Given {
        let store = InMemoryEventStore::new();
        store.seed(history).await;
        Given { store }
    }
}

impl Given {
    pub async fn when<C, H>(self, command: C, handler: H) -> When<C, InMemoryEventStore>
    where
        C: Command,
        H: CommandHandler<C, InMemoryEventStore> + 'static,
    {
        let mut executor = CommandExecutor::new(self.store.clone(), ExecutorConfig::default());
        executor.register(handler).expect("single handler registers cleanly");
        let result = executor.execute(command).await;
        When {
            store: self.store,
            result,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<C> When<C, InMemoryEventStore> {
    #[track_caller]
    pub fn then(self, expected: ExecutionResult) {
        assert_eq!(self.result.expect("expected a successful execution"), expected);
    }

    #[track_caller]
    pub fn then_err(self, assertion: impl FnOnce(&ExecutorError<Infallible>)) {
        match self.result {
            Ok(outcome) => panic!("expected an error, got {outcome:?}"),
            Err(err) => assertion(&err),
        }
    }

    /// Escape hatch for assertions against the resulting event log.
    pub fn store(&self) -> &InMemoryEventStore {
        &self.store
    }
}
