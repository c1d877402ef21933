//! "Closing the books": bounds projection cost for long-lived entities by
//! partitioning their history into time-periods, each opened by a synthetic
//! event carrying the closing state of the previous period.
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::append_condition::AppendCondition;
use crate::cursor::Cursor;
use crate::event::NewEvent;
use crate::event_store::{AppendError, EventStore, TransactionIsolation};
use crate::query::{tag_query, Query};
use crate::tag::Tag;

/// The granularity at which an entity's history is segmented. `None`
/// disables segmentation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    None,
    Monthly,
    Daily,
    Hourly,
}

/// Identifies a time-bounded segment of an entity's history. Two
/// `PeriodId`s are equal iff every component matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodId {
    pub entity_id: String,
    pub year: u32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
}

impl PeriodId {
    pub fn resolve(entity_id: impl Into<String>, period_type: PeriodType, at: DateTime<Utc>) -> Self {
        let entity_id = entity_id.into();
        match period_type {
            PeriodType::None => PeriodId {
                entity_id,
                year: at.year() as u32,
                month: None,
                day: None,
                hour: None,
            },
            PeriodType::Monthly => PeriodId {
                entity_id,
                year: at.year() as u32,
                month: Some(at.month()),
                day: None,
                hour: None,
            },
            PeriodType::Daily => PeriodId {
                entity_id,
                year: at.year() as u32,
                month: Some(at.month()),
                day: Some(at.day()),
                hour: None,
            },
            PeriodType::Hourly => PeriodId {
                entity_id,
                year: at.year() as u32,
                month: Some(at.month()),
                day: Some(at.day()),
                hour: Some(at.hour()),
            },
        }
    }

    /// Canonical string form, suitable as a tag value: `entity:year[:month[:day[:hour]]]`.
    pub fn canonical(&self) -> String {
        let mut parts = vec![self.entity_id.clone(), self.year.to_string()];
        if let Some(month) = self.month {
            parts.push(format!("{month:02}"));
        }
        if let Some(day) = self.day {
            parts.push(format!("{day:02}"));
        }
        if let Some(hour) = self.hour {
            parts.push(format!("{hour:02}"));
        }
        parts.join(":")
    }

    pub fn statement_tag(&self) -> Tag {
        Tag::new("statement_id", self.canonical()).expect("canonical period ids are never empty")
    }

    /// Tags a `PeriodOpened` event should carry for future scoping.
    pub fn period_tags(&self) -> Vec<Tag> {
        let mut tags = vec![self.statement_tag(), Tag::new("year", self.year.to_string()).unwrap()];
        if let Some(month) = self.month {
            tags.push(Tag::new("month", month.to_string()).unwrap());
        }
        if let Some(day) = self.day {
            tags.push(Tag::new("day", day.to_string()).unwrap());
        }
        if let Some(hour) = self.hour {
            tags.push(Tag::new("hour", hour.to_string()).unwrap());
        }
        tags
    }
}

/// Query scoping a decision model to a single period: its opening event
/// plus every event the entity produces tagged with the same period.
pub fn period_query(period: &PeriodId) -> Query {
    Query::new([tag_query(period.statement_tag())])
}

#[derive(thiserror::Error, Debug)]
pub enum PeriodError<E> {
    #[error(transparent)]
    Storage(#[from] E),
}

/// Resolves the current period for `entity_id`, opening it with
/// `opening_state` (serialized by the caller) if it does not already
/// exist. The append is guarded by an idempotency check on the period's
/// `statement_id` tag so concurrent callers cannot double-open a period.
///
/// `opening_state_payload` is only read if the period needs opening, but
/// the caller must still compute it eagerly since resolving the prior
/// period's closing balance requires a projection the caller already ran.
pub async fn resolve_period<ES>(
    store: &ES,
    entity_id: &str,
    period_type: PeriodType,
    now: DateTime<Utc>,
    opening_state_payload: Vec<u8>,
) -> Result<PeriodId, PeriodError<ES::Error>>
where
    ES: EventStore,
{
    let period = PeriodId::resolve(entity_id, period_type, now);
    let opening_query = Query::new([tag_query(period.statement_tag())]);

    let already_open = {
        use futures::TryStreamExt;
        store
            .stream(&opening_query, Cursor::ZERO)
            .try_next()
            .await?
            .is_some()
    };

    if already_open {
        return Ok(period);
    }

    let event = NewEvent::new("PeriodOpened", period.period_tags(), opening_state_payload);
    let condition = AppendCondition::idempotency(opening_query);

    match store.append_if(vec![event], condition, TransactionIsolation::default()).await {
        Ok(_) => Ok(period),
        Err(AppendError::DuplicateOperation { .. }) => Ok(period),
        Err(AppendError::ConcurrencyConflict { .. }) => Ok(period),
        Err(AppendError::Storage(e)) => Err(PeriodError::Storage(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn monthly_period_ignores_day_and_hour() {
        let period = PeriodId::resolve("w1", PeriodType::Monthly, at(2026, 7, 28, 14));
        assert_eq!(period.canonical(), "w1:2026:07");
    }

    #[test]
    fn hourly_period_includes_every_component() {
        let period = PeriodId::resolve("w1", PeriodType::Hourly, at(2026, 7, 28, 14));
        assert_eq!(period.canonical(), "w1:2026:07:28:14");
    }

    #[test]
    fn equal_components_mean_equal_period_ids() {
        let a = PeriodId::resolve("w1", PeriodType::Daily, at(2026, 7, 28, 9));
        let b = PeriodId::resolve("w1", PeriodType::Daily, at(2026, 7, 28, 23));
        assert_eq!(a, b);
    }
}
