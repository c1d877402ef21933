//! Turns commands into conditional event batches: resolve a handler, run it
//! inside a transaction, validate what it produced, and apply it with the
//! condition the handler read its decision model from.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::append_condition::AppendCondition;
use crate::cursor::Cursor;
use crate::event::{NewCommand, NewEvent};
use crate::event_store::{AppendError, EventStore, TransactionIsolation};

pub type DomainError = Box<dyn std::error::Error + Send + Sync>;

/// A command as the executor sees it: a routing discriminator and an
/// opaque payload for command persistence. Decoding the payload into
/// handler-specific fields is the handler's job, not the executor's.
pub trait Command: Send + Sync {
    fn command_type(&self) -> &'static str;
    fn payload(&self) -> Vec<u8>;
}

/// Why an operation was treated as already done rather than newly applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyReason {
    AlreadyProcessed,
    DuplicateOperation,
}

/// The outcome of `CommandExecutor::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Created { event_count: usize },
    Idempotent(IdempotencyReason),
}

/// What a handler hands back to the executor: the events it wants
/// appended, the condition to append them under, and — for handlers that
/// can detect their own no-ops — an idempotency reason to short-circuit on
/// before any append is attempted.
pub struct CommandResult {
    pub events: Vec<NewEvent>,
    pub condition: AppendCondition,
    pub idempotency_reason: Option<IdempotencyReason>,
}

impl CommandResult {
    pub fn created(events: Vec<NewEvent>, condition: AppendCondition) -> Self {
        Self {
            events,
            condition,
            idempotency_reason: None,
        }
    }

    pub fn already_processed() -> Self {
        Self {
            events: Vec::new(),
            condition: AppendCondition::none(),
            idempotency_reason: Some(IdempotencyReason::AlreadyProcessed),
        }
    }
}

/// User-supplied business logic for one command type.
#[async_trait]
pub trait CommandHandler<C, ES>: Send + Sync
where
    ES: EventStore,
{
    fn command_type(&self) -> &'static str;

    /// Creation-style commands can opt out of the default "duplicate means
    /// success" policy: if set, a duplicate append is propagated as a
    /// conflict instead of being swallowed. Never inferred from the command
    /// type string — always an explicit choice at registration.
    fn propagate_on_duplicate(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        store: &ES::Transaction,
        command: &C,
    ) -> Result<CommandResult, DomainError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError<E> {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("concurrency conflict at cursor {cursor}")]
    ConcurrencyConflict { cursor: Cursor },

    #[error("domain error: {0}")]
    Domain(#[source] DomainError),

    #[error(transparent)]
    Storage(#[from] E),
}

impl<E> From<AppendError<E>> for ExecutorError<E> {
    fn from(err: AppendError<E>) -> Self {
        match err {
            AppendError::ConcurrencyConflict { cursor } => ExecutorError::ConcurrencyConflict { cursor },
            AppendError::DuplicateOperation { .. } => {
                // Only reached if a handler's own append_if call (outside the
                // executor's handling below) surfaces this variant directly;
                // the executor itself always intercepts duplicates first.
                ExecutorError::ConcurrencyConflict { cursor: Cursor::ZERO }
            }
            AppendError::Storage(e) => ExecutorError::Storage(e),
        }
    }
}

fn validate_events(events: &[NewEvent]) -> Result<(), String> {
    for event in events {
        if event.event_type.is_empty() {
            return Err("event type must not be empty".to_string());
        }
        for tag in &event.tags {
            if tag.key().is_empty() || tag.value().is_empty() {
                return Err("event tags must have non-empty key and value".to_string());
            }
        }
    }
    Ok(())
}

/// Whether persisted command records should be written alongside events,
/// and the isolation level the executor's transaction should run at.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub persist_commands: bool,
    pub transaction_isolation: TransactionIsolation,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            persist_commands: true,
            transaction_isolation: TransactionIsolation::default(),
        }
    }
}

/// Routes commands to their registered handler and runs the append pipeline
/// described in the module doc.
pub struct CommandExecutor<C, ES: EventStore> {
    event_store: ES,
    config: ExecutorConfig,
    handlers: HashMap<&'static str, Arc<dyn CommandHandler<C, ES>>>,
}

impl<C, ES> CommandExecutor<C, ES>
where
    ES: EventStore,
{
    pub fn new(event_store: ES, config: ExecutorConfig) -> Self {
        Self {
            event_store,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for its declared command type. Fails fast if
    /// another handler already claims the same type.
    pub fn register(
        &mut self,
        handler: impl CommandHandler<C, ES> + 'static,
    ) -> Result<(), ExecutorError<ES::Error>> {
        let command_type = handler.command_type();
        if self.handlers.contains_key(command_type) {
            return Err(ExecutorError::InvalidCommand(format!(
                "a handler is already registered for command type '{command_type}'"
            )));
        }
        self.handlers.insert(command_type, Arc::new(handler));
        Ok(())
    }

    pub async fn execute(&self, command: C) -> Result<ExecutionResult, ExecutorError<ES::Error>>
    where
        C: Command,
    {
        let command_type = command.command_type();
        if command_type.is_empty() {
            return Err(ExecutorError::InvalidCommand(
                "command type must not be empty".to_string(),
            ));
        }
        let handler = self.handlers.get(command_type).cloned().ok_or_else(|| {
            ExecutorError::InvalidCommand(format!(
                "no handler registered for command type '{command_type}'"
            ))
        })?;
        let persist_commands = self.config.persist_commands;
        let propagate_on_duplicate = handler.propagate_on_duplicate();
        let command_type_owned = command_type.to_string();
        let payload = command.payload();
        let isolation = self.config.transaction_isolation;

        self.event_store
            .execute_in_transaction(isolation, move |tx| async move {
                let result = handler
                    .handle(&tx, &command)
                    .await
                    .map_err(ExecutorError::Domain)?;

                if result.events.is_empty() {
                    if let Some(reason) = result.idempotency_reason {
                        if persist_commands {
                            tx.store_command(NewCommand::new(command_type_owned, payload))
                                .await
                                .map_err(ExecutorError::Storage)?;
                        }
                        return Ok(ExecutionResult::Idempotent(reason));
                    }
                }

                validate_events(&result.events).map_err(ExecutorError::InvalidCommand)?;

                match tx.append_if(result.events, result.condition).await {
                    Ok(persisted) => {
                        if persist_commands {
                            tx.store_command(NewCommand::new(command_type_owned, payload))
                                .await
                                .map_err(ExecutorError::Storage)?;
                        }
                        Ok(ExecutionResult::Created {
                            event_count: persisted.len(),
                        })
                    }
                    Err(AppendError::DuplicateOperation { .. }) if !propagate_on_duplicate => {
                        if persist_commands {
                            tx.store_command(NewCommand::new(command_type_owned, payload))
                                .await
                                .map_err(ExecutorError::Storage)?;
                        }
                        Ok(ExecutionResult::Idempotent(
                            IdempotencyReason::DuplicateOperation,
                        ))
                    }
                    Err(AppendError::DuplicateOperation { conflicting_position }) => {
                        Err(ExecutorError::ConcurrencyConflict {
                            cursor: conflicting_position,
                        })
                    }
                    Err(AppendError::ConcurrencyConflict { cursor }) => {
                        Err(ExecutorError::ConcurrencyConflict { cursor })
                    }
                    Err(AppendError::Storage(e)) => Err(ExecutorError::Storage(e)),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{tag_query, Query};
    use crate::tag::Tag;
    use crate::testing::InMemoryEventStore;

    struct OpenWallet {
        wallet_id: String,
        owner: String,
        initial_balance: i64,
    }

    impl Command for OpenWallet {
        fn command_type(&self) -> &'static str {
            "open_wallet"
        }

        fn payload(&self) -> Vec<u8> {
            format!("{}:{}:{}", self.wallet_id, self.owner, self.initial_balance).into_bytes()
        }
    }

    struct OpenWalletHandler;

    #[async_trait]
    impl CommandHandler<OpenWallet, InMemoryEventStore> for OpenWalletHandler {
        fn command_type(&self) -> &'static str {
            "open_wallet"
        }

        fn propagate_on_duplicate(&self) -> bool {
            true
        }

        async fn handle(
            &self,
            _store: &<InMemoryEventStore as EventStore>::Transaction,
            command: &OpenWallet,
        ) -> Result<CommandResult, DomainError> {
            let wallet_tag = Tag::new("wallet_id", &command.wallet_id).unwrap();
            let event = NewEvent::new(
                "WalletOpened",
                vec![wallet_tag.clone()],
                command.initial_balance.to_le_bytes().to_vec(),
            );
            let idempotency = Query::new([tag_query(wallet_tag).with_types(["WalletOpened"])]);
            Ok(CommandResult::created(
                vec![event],
                AppendCondition::idempotency(idempotency),
            ))
        }
    }

    fn executor() -> CommandExecutor<OpenWallet, InMemoryEventStore> {
        let mut executor = CommandExecutor::new(InMemoryEventStore::new(), ExecutorConfig::default());
        executor.register(OpenWalletHandler).unwrap();
        executor
    }

    #[tokio::test]
    async fn creates_events_on_first_execution() {
        let executor = executor();
        let result = executor
            .execute(OpenWallet {
                wallet_id: "w1".into(),
                owner: "Alice".into(),
                initial_balance: 1000,
            })
            .await
            .unwrap();
        assert_eq!(result, ExecutionResult::Created { event_count: 1 });
    }

    #[tokio::test]
    async fn a_second_identical_open_is_treated_as_a_duplicate() {
        let executor = executor();
        let open = || OpenWallet {
            wallet_id: "w1".into(),
            owner: "Alice".into(),
            initial_balance: 1000,
        };
        executor.execute(open()).await.unwrap();
        let result = executor.execute(open()).await.unwrap();
        assert_eq!(
            result,
            ExecutionResult::Idempotent(IdempotencyReason::DuplicateOperation)
        );
    }

    #[tokio::test]
    async fn unregistered_command_type_is_rejected() {
        struct Unregistered;
        impl Command for Unregistered {
            fn command_type(&self) -> &'static str {
                "does_not_exist"
            }
            fn payload(&self) -> Vec<u8> {
                Vec::new()
            }
        }
        let empty_executor: CommandExecutor<Unregistered, InMemoryEventStore> =
            CommandExecutor::new(InMemoryEventStore::new(), ExecutorConfig::default());
        let err = empty_executor.execute(Unregistered).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn duplicate_handler_registration_fails_fast() {
        let mut executor: CommandExecutor<OpenWallet, InMemoryEventStore> =
            CommandExecutor::new(InMemoryEventStore::new(), ExecutorConfig::default());
        executor.register(OpenWalletHandler).unwrap();
        let err = executor.register(OpenWalletHandler).unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidCommand(_)));
    }
}
