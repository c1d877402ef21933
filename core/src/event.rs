//! Events as they travel to and from the storage layer.
//!
//! The storage layer never interprets an event's payload: it persists
//! opaque bytes and filters on `event_type`/`tags` alone. Decoding the
//! payload into a domain type is entirely the caller's responsibility
//! (typically inside a `ProjectorSpec`'s transition closure).
use chrono::{DateTime, Utc};

use crate::cursor::Cursor;
use crate::tag::Tag;

/// A domain event type that knows its own wire name and the tags it should
/// carry. Implemented by hand or via `#[derive(dcb_core::Event)]`; either
/// way, `to_new_event` is how a command handler turns a domain value into
/// something `EventStore::append`/`append_if` will accept.
pub trait Event {
    fn event_type(&self) -> &'static str;
    fn tags(&self) -> Vec<Tag>;

    fn to_new_event(&self, payload: Vec<u8>) -> NewEvent {
        NewEvent::new(self.event_type(), self.tags(), payload)
    }
}

/// A not-yet-persisted event, as produced by a command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_type: String,
    pub tags: Vec<Tag>,
    pub payload: Vec<u8>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, tags: Vec<Tag>, payload: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            tags,
            payload,
        }
    }
}

/// An event that has been durably committed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEvent {
    pub position: Cursor,
    pub transaction_id: String,
    pub event_type: String,
    pub tags: Vec<Tag>,
    pub payload: Vec<u8>,
    pub occurred_at: DateTime<Utc>,
}

impl PersistedEvent {
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }
}

/// A persisted command record, stored only when the executor is configured
/// to persist commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommand {
    pub command_type: String,
    pub payload: Vec<u8>,
}

impl NewCommand {
    pub fn new(command_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
        }
    }
}
