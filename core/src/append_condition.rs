//! Optimistic concurrency for appends: a command handler states the
//! boundary of what it read, and the store refuses to append if something
//! matching that boundary slipped in after the handler's cursor.
use crate::cursor::Cursor;
use crate::query::Query;

/// The condition a handler attaches to an append.
///
/// `state_change_query`/`cursor` is the *consistency boundary*: if any event
/// matching `state_change_query` was appended after `cursor`, the decision
/// was made on stale information and the append must be rejected. The
/// optional `idempotency_query` is checked regardless of cursor: if any
/// event ever matched it, the operation is treated as a duplicate rather
/// than a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppendCondition {
    state_change_query: Query,
    cursor: Cursor,
    idempotency_query: Option<Query>,
}

impl AppendCondition {
    /// No condition at all: the append always succeeds. Used for events with
    /// no consistency requirements (e.g. pure facts that never conflict).
    pub fn none() -> Self {
        Self::default()
    }

    /// Rejects the append if any event matching `query` was appended after
    /// `cursor` — the boundary the handler read its decision model from.
    pub fn cursor(query: Query, cursor: Cursor) -> Self {
        Self {
            state_change_query: query,
            cursor,
            idempotency_query: None,
        }
    }

    /// Rejects the append as a duplicate if any event ever matched `query`,
    /// independent of cursor.
    pub fn idempotency(query: Query) -> Self {
        Self {
            state_change_query: Query::all(),
            cursor: Cursor::ZERO,
            idempotency_query: Some(query),
        }
    }

    /// Attaches an idempotency check to a cursor-based condition.
    pub fn and_idempotency(mut self, query: Query) -> Self {
        self.idempotency_query = Some(query);
        self
    }

    pub fn state_change_query(&self) -> &Query {
        &self.state_change_query
    }

    pub fn cursor_value(&self) -> Cursor {
        self.cursor
    }

    pub fn idempotency_query(&self) -> Option<&Query> {
        self.idempotency_query.as_ref()
    }
}
