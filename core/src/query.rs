//! A `Query` is a disjunction of `QueryItem`s used both to filter the event
//! stream and, combined with a `Cursor`, to describe the decision model a
//! command handler read.
use crate::tag::Tag;

/// A conjunction of constraints: events must match one of `event_types` (if
/// any are given) AND carry every tag in `tags` (if any are given).
///
/// A `QueryItem` with both fields empty matches every event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryItem {
    event_types: Vec<String>,
    tags: Vec<Tag>,
}

impl QueryItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts this item to the given event types (OR'd among themselves).
    pub fn with_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Requires every given tag to be present on the event (AND'd together).
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Evaluates this item against an event's type and tag set.
    pub fn matches(&self, event_type: &str, event_tags: &[Tag]) -> bool {
        let type_matches = self.event_types.is_empty()
            || self.event_types.iter().any(|t| t == event_type);
        let tags_match = self
            .tags
            .iter()
            .all(|required| event_tags.contains(required));
        type_matches && tags_match
    }
}

/// A disjunction of `QueryItem`s. An event matches the query if it matches
/// at least one item; a query with no items matches every event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    items: Vec<QueryItem>,
}

impl Query {
    /// The query that matches every event in the store.
    pub fn all() -> Self {
        Query { items: Vec::new() }
    }

    pub fn new(items: impl IntoIterator<Item = QueryItem>) -> Self {
        Query {
            items: items.into_iter().collect(),
        }
    }

    /// Combines this query with another as an OR.
    pub fn or(mut self, other: Query) -> Self {
        self.items.extend(other.items);
        self
    }

    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn matches(&self, event_type: &str, event_tags: &[Tag]) -> bool {
        self.items.is_empty() || self.items.iter().any(|item| item.matches(event_type, event_tags))
    }
}

/// Builds a `QueryItem` restricted to a single tag, the most common shape
/// used for per-entity decision models (e.g. `wallet_id = w1`).
pub fn tag_query(tag: Tag) -> QueryItem {
    QueryItem::new().with_tags([tag])
}
