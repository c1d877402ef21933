//! How a processor reads its batch of events each cycle.
use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::event::PersistedEvent;
use crate::event_store::EventStore;
use crate::query::Query;

/// Supplies the next batch of events for a processor to handle.
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait]
pub trait EventFetcher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns 0 to `batch_size` events strictly after `last_position`, in
    /// ascending position order.
    async fn fetch(
        &self,
        processor_id: &str,
        last_position: Cursor,
        batch_size: usize,
    ) -> Result<Vec<PersistedEvent>, Self::Error>;
}

/// The default fetcher: a plain query against the event store, scoped to
/// whatever events the processor cares about.
pub struct QueryEventFetcher<ES> {
    event_store: ES,
    query: Query,
}

impl<ES> QueryEventFetcher<ES> {
    pub fn new(event_store: ES, query: Query) -> Self {
        Self { event_store, query }
    }
}

#[async_trait]
impl<ES> EventFetcher for QueryEventFetcher<ES>
where
    ES: EventStore,
{
    type Error = ES::Error;

    async fn fetch(
        &self,
        _processor_id: &str,
        last_position: Cursor,
        batch_size: usize,
    ) -> Result<Vec<PersistedEvent>, Self::Error> {
        use futures::StreamExt;

        let mut stream = self.event_store.stream(&self.query, last_position);
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match stream.next().await {
                Some(Ok(event)) => batch.push(event),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        Ok(batch)
    }
}
