//! Server-side rendering of metadata matchers and name filters.
//!
//! The SQL mirrors [`MetadataMatcher::matches`]: a missing key never
//! matches, and ordering is numeric when both sides look like numbers.

use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

use chronicle_core::event::scalar_text;
use chronicle_core::matcher::{Field, MessageProperty, MetadataMatch, MetadataMatcher, Operator};
use chronicle_core::store::NameFilter;

/// Text accepted by both `str::parse::<f64>` and a `numeric` cast.
const NUMERIC_PATTERN: &str = r"^[-+]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][-+]?[0-9]+)?$";

/// Appends ` AND <condition>` for every match in `matcher`.
///
/// `metadata_column` is the JSONB column the metadata keys live in. When
/// `with_properties` is false, property matches render as `FALSE`.
pub(crate) fn push_matcher(
    qb: &mut QueryBuilder<'_, Postgres>,
    matcher: &MetadataMatcher,
    metadata_column: &str,
    with_properties: bool,
) {
    for m in matcher.iter() {
        qb.push(" AND ");
        push_match(qb, m, metadata_column, with_properties);
    }
}

fn push_match(
    qb: &mut QueryBuilder<'_, Postgres>,
    m: &MetadataMatch,
    metadata_column: &str,
    with_properties: bool,
) {
    let column = match &m.field {
        Field::Metadata(key) => Column::Metadata(metadata_column.to_owned(), key.clone()),
        Field::Property(_) if !with_properties => {
            qb.push("FALSE");
            return;
        }
        Field::Property(MessageProperty::EventId) => Column::Plain("event_id::text"),
        Field::Property(MessageProperty::EventName) => Column::Plain("event_name"),
    };

    match m.operator {
        Operator::Regex => match m.pattern() {
            Some(pattern) => {
                qb.push("(");
                column.push(qb);
                qb.push(" ~ ").push_bind(pattern.as_str().to_owned()).push(")");
            }
            None => {
                qb.push("FALSE");
            }
        },
        Operator::In | Operator::NotIn => {
            let candidates: Vec<Value> = match &m.value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if m.operator == Operator::NotIn {
                qb.push("NOT ");
            }
            qb.push("(");
            if candidates.is_empty() {
                qb.push("FALSE");
            }
            for (index, candidate) in candidates.iter().enumerate() {
                if index > 0 {
                    qb.push(" OR ");
                }
                push_comparison(qb, &column, "=", candidate);
            }
            qb.push(")");
            // NOT (NULL) is NULL, so a missing key still never matches.
        }
        operator => push_comparison(qb, &column, sql_operator(operator), &m.value),
    }
}

enum Column {
    Metadata(String, String),
    Plain(&'static str),
}

impl Column {
    fn push(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Metadata(column, key) => {
                qb.push("(").push(column).push("->>").push_bind(key.clone()).push(")");
            }
            Self::Plain(expr) => {
                qb.push(*expr);
            }
        }
    }
}

fn sql_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Equals | Operator::In | Operator::NotIn => "=",
        Operator::NotEquals => "<>",
        Operator::GreaterThan => ">",
        Operator::GreaterThanEquals => ">=",
        Operator::LowerThan => "<",
        Operator::LowerThanEquals => "<=",
        Operator::Regex => "~",
    }
}

fn push_comparison(qb: &mut QueryBuilder<'_, Postgres>, column: &Column, op: &str, expected: &Value) {
    let Some(expected) = scalar_text(expected) else {
        qb.push("FALSE");
        return;
    };

    if expected.parse::<f64>().is_ok_and(f64::is_finite) {
        qb.push("(CASE WHEN ");
        column.push(qb);
        qb.push(" ~ ").push_bind(NUMERIC_PATTERN).push(" THEN (");
        column.push(qb);
        qb.push(")::numeric ")
            .push(op)
            .push(" ")
            .push_bind(expected.clone())
            .push("::numeric ELSE ");
        column.push(qb);
        qb.push(" COLLATE \"C\" ")
            .push(op)
            .push(" ")
            .push_bind(expected)
            .push(" END)");
    } else {
        qb.push("(");
        column.push(qb);
        qb.push(" COLLATE \"C\" ")
            .push(op)
            .push(" ")
            .push_bind(expected)
            .push(")");
    }
}

/// Appends ` AND <condition>` restricting `column` by `filter`.
pub(crate) fn push_name_filter(
    qb: &mut QueryBuilder<'_, Postgres>,
    filter: &NameFilter,
    column: &str,
) {
    match filter {
        NameFilter::Exact(name) => {
            qb.push(" AND ").push(column).push(" = ").push_bind(name.clone());
        }
        NameFilter::Prefix(prefix) => {
            qb.push(" AND left(")
                .push(column)
                .push(", ")
                .push_bind(i32::try_from(prefix.chars().count()).unwrap_or(i32::MAX))
                .push(") = ")
                .push_bind(prefix.clone());
        }
        NameFilter::Regex(pattern) => {
            qb.push(" AND ")
                .push(column)
                .push(" ~ ")
                .push_bind(pattern.as_str().to_owned());
        }
    }
}
