//! Ties the processor runtime to period segmentation: every batch of
//! wallet-tagged events the runtime delivers, this handler makes sure the
//! events' period is open.
use async_trait::async_trait;
use dcb_core::{resolve_period, EventFetcher, EventHandler, EventStore, PeriodError, PeriodType, PersistedEvent};

use crate::domain::read_balance;

pub struct StatementProjector<ES> {
    store: ES,
    period_type: PeriodType,
}

impl<ES> StatementProjector<ES> {
    pub fn new(store: ES, period_type: PeriodType) -> Self {
        Self { store, period_type }
    }
}

#[async_trait]
impl<ES: EventStore> EventHandler for StatementProjector<ES> {
    type Error = ES::Error;

    async fn handle(&self, _processor_id: &str, events: &[PersistedEvent]) -> Result<usize, Self::Error> {
        let mut handled = 0;
        for event in events {
            let Some(wallet_tag) = event.tags.iter().find(|t| t.key() == "wallet_id") else {
                continue;
            };
            // Only read if the period turns out to need opening, but we have
            // to compute it eagerly: resolving the prior period's closing
            // balance requires this same projection either way.
            let closing_state = read_balance(&self.store, wallet_tag.value()).await?;
            let payload = serde_json::to_vec(&closing_state).expect("json serialization should not fail");
            match resolve_period(&self.store, wallet_tag.value(), self.period_type, event.occurred_at, payload).await {
                Ok(_) => handled += 1,
                Err(PeriodError::Storage(err)) => return Err(err),
            }
        }
        Ok(handled)
    }
}

/// The query scoping which events the statement processor is fed: every
/// wallet-lifecycle event, regardless of which wallet it belongs to.
pub fn statement_fetcher<ES: EventStore>(store: ES) -> impl EventFetcher {
    dcb_core::QueryEventFetcher::new(store, dcb_core::Query::all())
}
