//! Folding a slice of the event stream into a state, one or more
//! projectors at a time.
use std::sync::Arc;

use futures::TryStreamExt;

use crate::cursor::Cursor;
use crate::event::PersistedEvent;
use crate::event_store::EventStore;
use crate::query::Query;

/// A named, stateless transition rule: given the state threaded through
/// `project`, and an event it cares about, returns the next state.
///
/// Kept as a small value wrapping a boxed closure rather than a trait with
/// an associated `State` type, since in practice a single `project` call
/// threads one shared state type through every projector supplied to it,
/// and a closure is enough to capture whatever payload decoder the caller
/// needs.
#[derive(Clone)]
pub struct ProjectorSpec<S> {
    id: &'static str,
    event_types: Vec<String>,
    transition: Arc<dyn Fn(S, &PersistedEvent) -> S + Send + Sync>,
}

impl<S> ProjectorSpec<S> {
    /// `event_types` scopes which events this projector's transition is
    /// invoked for; an empty list means "every event the enclosing query
    /// returns".
    pub fn new(
        id: &'static str,
        event_types: impl IntoIterator<Item = impl Into<String>>,
        transition: impl Fn(S, &PersistedEvent) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            event_types: event_types.into_iter().map(Into::into).collect(),
            transition: Arc::new(transition),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    fn cares_about(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }

    fn apply(&self, state: S, event: &PersistedEvent) -> S {
        (self.transition)(state, event)
    }
}

/// Streams events matching `query` strictly after `from_cursor`, threading
/// `initial_state` through every projector that cares about each event, in
/// the order `projectors` was given.
///
/// Returns the resulting state along with the cursor it is valid as of —
/// `from_cursor` unchanged if the stream was empty, otherwise the position
/// of the last event folded in.
pub async fn project<ES, S>(
    store: &ES,
    query: &Query,
    from_cursor: Cursor,
    initial_state: S,
    projectors: &[ProjectorSpec<S>],
) -> Result<(S, Cursor), ES::Error>
where
    ES: EventStore,
{
    let mut state = initial_state;
    let mut cursor = from_cursor;
    let mut stream = store.stream(query, from_cursor);
    while let Some(event) = stream.try_next().await? {
        for projector in projectors {
            if projector.cares_about(&event.event_type) {
                state = projector.apply(state, &event);
            }
        }
        cursor = event.position;
    }
    Ok((state, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;
    use crate::testing::InMemoryEventStore;

    fn event(event_type: &str, tags: Vec<Tag>, payload: &[u8]) -> crate::event::NewEvent {
        crate::event::NewEvent::new(event_type, tags, payload.to_vec())
    }

    #[tokio::test]
    async fn folds_only_events_the_projector_cares_about() {
        let store = InMemoryEventStore::new();
        let wallet = Tag::new("wallet_id", "w1").unwrap();
        store
            .append(vec![
                event("WalletOpened", vec![wallet.clone()], b"0"),
                event("Deposited", vec![wallet.clone()], b"10"),
                event("Noise", vec![wallet.clone()], b"ignored"),
            ])
            .await
            .unwrap();

        let spec = ProjectorSpec::new("balance", ["Deposited"], |state: i64, event| {
            state + String::from_utf8_lossy(&event.payload).parse::<i64>().unwrap_or(0)
        });

        let (balance, cursor) = project(
            &store,
            &Query::all(),
            Cursor::ZERO,
            0i64,
            std::slice::from_ref(&spec),
        )
        .await
        .unwrap();

        assert_eq!(balance, 10);
        assert_eq!(cursor, Cursor::new(3));
    }
}
