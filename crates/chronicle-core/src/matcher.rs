//! Metadata filters applied when reading streams.
//!
//! A [`MetadataMatcher`] is a conjunction of `(field, operator, value)`
//! triples. Values are compared on their scalar text form (see
//! [`scalar_text`]); ordering operators compare numerically when both sides
//! parse as numbers and lexically otherwise. Persistence strategies may push
//! the matcher down to the database, but [`MetadataMatcher::matches`] is the
//! reference semantics every strategy must agree with.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::DomainError;
use crate::event::{Event, Metadata, scalar_text};

/// Comparison operator of a single match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `field = value`
    Equals,
    /// `field <> value`; a missing field does not match.
    NotEquals,
    /// `field > value`
    GreaterThan,
    /// `field >= value`
    GreaterThanEquals,
    /// `field < value`
    LowerThan,
    /// `field <= value`
    LowerThanEquals,
    /// `field` equals one of the array elements in `value`.
    In,
    /// `field` equals none of the array elements in `value`.
    NotIn,
    /// `field` matches the regular expression in `value`; an invalid
    /// expression matches nothing.
    Regex,
}

/// Event property addressable by a match instead of a metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageProperty {
    /// The event identifier.
    EventId,
    /// The stored event type name.
    EventName,
}

/// What a match looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// A metadata key.
    Metadata(String),
    /// An event property.
    Property(MessageProperty),
}

/// One `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMatch {
    /// Field to inspect.
    pub field: Field,
    /// Comparison operator.
    pub operator: Operator,
    /// Value to compare against; an array for `In` / `NotIn`.
    pub value: Value,
    pattern: Option<Pattern>,
}

/// Conjunction of metadata matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMatcher {
    matches: Vec<MetadataMatch>,
}

impl MetadataMatcher {
    /// An empty matcher accepts every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a match on a metadata key.
    #[must_use]
    pub fn with_metadata_match(
        mut self,
        key: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.matches
            .push(MetadataMatch::new(Field::Metadata(key.into()), operator, value.into()));
        self
    }

    /// Adds a regular-expression match on a metadata key.
    ///
    /// # Errors
    ///
    /// `Configuration` if `pattern` does not compile.
    pub fn with_metadata_regex(
        self,
        key: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, DomainError> {
        Pattern::new(pattern)?;
        Ok(self.with_metadata_match(key, Operator::Regex, pattern))
    }

    /// Adds a match on an event property.
    #[must_use]
    pub fn with_property_match(
        mut self,
        property: MessageProperty,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.matches
            .push(MetadataMatch::new(Field::Property(property), operator, value.into()));
        self
    }

    /// Whether the matcher has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// The individual matches, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MetadataMatch> {
        self.matches.iter()
    }

    /// Whether `event` satisfies every match.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.matches.iter().all(|m| m.matches(event))
    }

    /// Whether a bare metadata map (e.g. stream metadata) satisfies every
    /// match. Property matches never hold here.
    #[must_use]
    pub fn matches_metadata(&self, metadata: &Metadata) -> bool {
        self.matches.iter().all(|m| match &m.field {
            Field::Metadata(key) => m.holds_for(metadata.get(key).and_then(scalar_text)),
            Field::Property(_) => false,
        })
    }
}

impl MetadataMatch {
    fn new(field: Field, operator: Operator, value: Value) -> Self {
        let pattern = if operator == Operator::Regex {
            scalar_text(&value).and_then(|source| Pattern::new(&source).ok())
        } else {
            None
        };
        Self {
            field,
            operator,
            value,
            pattern,
        }
    }

    /// The compiled expression of a `Regex` match; `None` for other
    /// operators and for expressions that failed to compile.
    #[must_use]
    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    /// Whether `event` satisfies this single match.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let actual = match &self.field {
            Field::Metadata(key) => event.metadata.get(key).and_then(scalar_text),
            Field::Property(MessageProperty::EventId) => Some(event.event_id.to_string()),
            Field::Property(MessageProperty::EventName) => Some(event.event_type.clone()),
        };
        self.holds_for(actual)
    }

    fn holds_for(&self, actual: Option<String>) -> bool {
        let Some(actual) = actual else {
            return false;
        };

        match self.operator {
            Operator::Equals => compare(&actual, &self.value) == Some(Ordering::Equal),
            Operator::NotEquals => {
                scalar_text(&self.value).is_some()
                    && compare(&actual, &self.value) != Some(Ordering::Equal)
            }
            Operator::GreaterThan => compare(&actual, &self.value) == Some(Ordering::Greater),
            Operator::GreaterThanEquals => matches!(
                compare(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LowerThan => compare(&actual, &self.value) == Some(Ordering::Less),
            Operator::LowerThanEquals => matches!(
                compare(&actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => candidates(&self.value)
                .iter()
                .any(|c| compare(&actual, c) == Some(Ordering::Equal)),
            Operator::NotIn => !candidates(&self.value)
                .iter()
                .any(|c| compare(&actual, c) == Some(Ordering::Equal)),
            Operator::Regex => self.pattern.as_ref().is_some_and(|p| p.is_match(&actual)),
        }
    }
}

fn candidates(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Compares a stored scalar against an expected JSON value.
///
/// Numeric when both sides parse as numbers, text otherwise. `None` when the
/// expected value has no scalar form.
fn compare(actual: &str, expected: &Value) -> Option<Ordering> {
    let expected = scalar_text(expected)?;
    if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    Some(actual.cmp(expected.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AGGREGATE_ID, AGGREGATE_TYPE, AGGREGATE_VERSION};
    use chrono::Utc;
    use serde_json::json;

    fn ticket_event(id: &str, version: i64) -> Event {
        Event::new("ticket.registered", json!({}), Utc::now())
            .with_metadata_entry(AGGREGATE_ID, id)
            .with_metadata_entry(AGGREGATE_TYPE, "Ticket")
            .with_metadata_entry(AGGREGATE_VERSION, version)
    }

    #[test]
    fn test_empty_matcher_accepts_everything() {
        assert!(MetadataMatcher::new().matches(&ticket_event("t1", 1)));
    }

    #[test]
    fn test_equality_conjunction_isolates_one_aggregate() {
        let matcher = MetadataMatcher::new()
            .with_metadata_match(AGGREGATE_TYPE, Operator::Equals, "Ticket")
            .with_metadata_match(AGGREGATE_ID, Operator::Equals, "t1");

        assert!(matcher.matches(&ticket_event("t1", 1)));
        assert!(!matcher.matches(&ticket_event("t2", 1)));
    }

    #[test]
    fn test_numeric_comparison_is_not_lexical() {
        let matcher =
            MetadataMatcher::new().with_metadata_match(AGGREGATE_VERSION, Operator::GreaterThan, 9);

        assert!(matcher.matches(&ticket_event("t1", 10)));
        assert!(!matcher.matches(&ticket_event("t1", 9)));
    }

    #[test]
    fn test_number_and_string_forms_compare_equal() {
        let matcher = MetadataMatcher::new().with_metadata_match(AGGREGATE_ID, Operator::Equals, 1);

        assert!(matcher.matches(&ticket_event("1", 1)));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let matcher =
            MetadataMatcher::new().with_metadata_match("tenant", Operator::NotEquals, "acme");

        assert!(!matcher.matches(&ticket_event("t1", 1)));
    }

    #[test]
    fn test_in_and_not_in() {
        let within = MetadataMatcher::new().with_metadata_match(
            AGGREGATE_ID,
            Operator::In,
            json!(["t1", "t3"]),
        );
        let outside = MetadataMatcher::new().with_metadata_match(
            AGGREGATE_ID,
            Operator::NotIn,
            json!(["t1", "t3"]),
        );

        assert!(within.matches(&ticket_event("t3", 1)));
        assert!(!within.matches(&ticket_event("t2", 1)));
        assert!(outside.matches(&ticket_event("t2", 1)));
        assert!(!outside.matches(&ticket_event("t1", 1)));
    }

    #[test]
    fn test_stream_metadata_match_ignores_properties() {
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), json!("billing"));
        let by_owner =
            MetadataMatcher::new().with_metadata_match("owner", Operator::Equals, "billing");
        let by_name = MetadataMatcher::new().with_property_match(
            MessageProperty::EventName,
            Operator::Equals,
            "billing",
        );

        assert!(by_owner.matches_metadata(&metadata));
        assert!(!by_name.matches_metadata(&metadata));
    }

    #[test]
    fn test_regex_matches_metadata_and_properties() {
        let by_id = MetadataMatcher::new()
            .with_metadata_regex(AGGREGATE_ID, "^t[0-9]+$")
            .unwrap();
        let by_name = MetadataMatcher::new().with_property_match(
            MessageProperty::EventName,
            Operator::Regex,
            r"^ticket\.",
        );

        assert!(by_id.matches(&ticket_event("t42", 1)));
        assert!(!by_id.matches(&ticket_event("x42", 1)));
        assert!(by_name.matches(&ticket_event("t1", 1)));
    }

    #[test]
    fn test_invalid_regex_is_rejected_or_matches_nothing() {
        let rejected = MetadataMatcher::new().with_metadata_regex(AGGREGATE_ID, "t(");
        let unchecked =
            MetadataMatcher::new().with_metadata_match(AGGREGATE_ID, Operator::Regex, "t(");

        assert!(matches!(rejected, Err(DomainError::Configuration(_))));
        assert!(unchecked.iter().all(|m| m.pattern().is_none()));
        assert!(!unchecked.matches(&ticket_event("t(", 1)));
    }

    #[test]
    fn test_event_name_property_match() {
        let matcher = MetadataMatcher::new().with_property_match(
            MessageProperty::EventName,
            Operator::Equals,
            "ticket.registered",
        );

        assert!(matcher.matches(&ticket_event("t1", 1)));
    }
}
