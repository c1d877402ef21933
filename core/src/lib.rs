//! Storage-agnostic core of a Dynamic Consistency Boundary event-sourcing
//! system: a tag-indexed append-only event log, optimistic-concurrency
//! appends, incremental projections, a command executor, a leader-elected
//! processor runtime, and time-period segmentation.
//!
//! This crate fixes the contracts (`EventStore`, `CommandHandler`,
//! `EventFetcher`, `EventHandler`, `LeaderElector`, `ProgressStore`) that a
//! storage backend and a domain application plug into; it contains no
//! database client and no JSON/serde wiring of its own — both are the
//! concern of the crates built on top of it.
mod append_condition;
mod clock;
mod command_executor;
mod cursor;
mod event;
mod event_store;
mod leader;
mod period;
mod processor;
mod projection;
mod query;
mod tag;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use append_condition::AppendCondition;
pub use clock::{ClockProvider, FixedClock, SystemClock};
pub use command_executor::{
    Command, CommandExecutor, CommandHandler, CommandResult, DomainError, ExecutionResult,
    ExecutorConfig, ExecutorError, IdempotencyReason,
};
pub use cursor::Cursor;
pub use event::{Event, NewCommand, NewEvent, PersistedEvent};
pub use event_store::{AppendError, EventStore, EventStoreTransaction, TransactionIsolation};
pub use leader::LeaderElector;
pub use period::{period_query, resolve_period, PeriodError, PeriodId, PeriodType};
pub use processor::{
    BackoffConfig, BackoffState, EventFetcher, EventHandler, ProcessorConfig, ProcessorProgress,
    ProcessorRuntime, ProcessorStatus, ProgressStore, QueryEventFetcher,
};
pub use projection::{project, ProjectorSpec};
pub use query::{tag_query, Query, QueryItem};
pub use tag::{InvalidTag, Tag};

pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(feature = "macros")]
pub use dcb_macros::Event;
