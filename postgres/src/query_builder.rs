//! Translates a `dcb_core::Query` plus a cursor into a parameterized SQL
//! predicate: `(event_type = ANY($n) OR $n IS NULL) AND tags @> $m`-style
//! per `QueryItem`, OR'd together, AND'd with `position > $cursor`.
use dcb_core::{Cursor, Query};
use sqlx::{Postgres, QueryBuilder};

/// Appends `position > $1 [AND (<query criteria>)]` to `builder`.
pub(crate) fn push_criteria<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a Query, after: Cursor) {
    builder.push("position > ");
    builder.push_bind(after.position());

    if query.is_empty() {
        return;
    }

    builder.push(" AND (");
    let mut items = query.items().iter().peekable();
    while let Some(item) = items.next() {
        builder.push("(");
        let mut wrote = false;

        if !item.event_types().is_empty() {
            builder.push("event_type = ANY(");
            builder.push_bind(item.event_types().to_vec());
            builder.push(")");
            wrote = true;
        }

        if !item.tags().is_empty() {
            if wrote {
                builder.push(" AND ");
            }
            builder.push("tags @> ");
            let canonical: Vec<String> = item.tags().iter().map(|t| t.canonical()).collect();
            builder.push_bind(canonical);
            wrote = true;
        }

        if !wrote {
            builder.push("TRUE");
        }
        builder.push(")");

        if items.peek().is_some() {
            builder.push(" OR ");
        }
    }
    builder.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::{tag_query, Tag};

    #[test]
    fn empty_query_only_filters_on_cursor() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM event WHERE ");
        push_criteria(&mut builder, &Query::all(), Cursor::new(5));
        assert_eq!(builder.sql(), "SELECT * FROM event WHERE position > $1");
    }

    #[test]
    fn single_item_with_type_and_tag() {
        let query = Query::new([
            dcb_core::QueryItem::new()
                .with_types(["Deposited"])
                .with_tags([Tag::new("wallet_id", "w1").unwrap()]),
        ]);
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM event WHERE ");
        push_criteria(&mut builder, &query, Cursor::ZERO);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM event WHERE position > $1 AND ((event_type = ANY($2) AND tags @> $3))"
        );
    }

    #[test]
    fn two_items_are_ored() {
        let query = Query::new([
            tag_query(Tag::new("wallet_id", "w1").unwrap()),
            tag_query(Tag::new("wallet_id", "w2").unwrap()),
        ]);
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM event WHERE ");
        push_criteria(&mut builder, &query, Cursor::ZERO);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM event WHERE position > $1 AND ((tags @> $2) OR (tags @> $3))"
        );
    }
}
