//! Aggregate-to-stream naming.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;
use crate::stream::{CATEGORY_SEPARATOR, StreamName};

/// How aggregates are partitioned into physical streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceStrategy {
    /// One shared stream per aggregate type; instances are told apart by
    /// the aggregate-id metadata.
    #[default]
    SingleStream,
    /// One stream per aggregate instance, named `<type>-<id>`.
    AggregateStream,
}

impl PersistenceStrategy {
    /// The configuration spelling of this strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleStream => "single",
            Self::AggregateStream => "aggregate",
        }
    }
}

impl fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::SingleStream),
            "aggregate" => Ok(Self::AggregateStream),
            other => Err(DomainError::Configuration(format!(
                "unknown persistence strategy {other:?}, expected \"single\" or \"aggregate\""
            ))),
        }
    }
}

/// Computes the physical stream for an aggregate instance.
#[derive(Debug, Clone, Default)]
pub struct StreamNamingStrategy {
    strategy: PersistenceStrategy,
    overrides: HashMap<String, String>,
}

impl StreamNamingStrategy {
    /// Creates a naming strategy with no stream-name overrides.
    #[must_use]
    pub fn new(strategy: PersistenceStrategy) -> Self {
        Self {
            strategy,
            overrides: HashMap::new(),
        }
    }

    /// Routes `aggregate_type` to `stream_name` instead of its own type name.
    ///
    /// Several aggregate types may share one override.
    #[must_use]
    pub fn with_stream_override(
        mut self,
        aggregate_type: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Self {
        self.overrides
            .insert(aggregate_type.into(), stream_name.into());
        self
    }

    /// The configured persistence strategy.
    #[must_use]
    pub fn strategy(&self) -> PersistenceStrategy {
        self.strategy
    }

    /// Whether the aggregate owns its stream exclusively, so stream
    /// positions equal aggregate versions.
    #[must_use]
    pub fn is_exclusive_stream(&self, aggregate_type: &str) -> bool {
        self.strategy == PersistenceStrategy::AggregateStream
            && !self.overrides.contains_key(aggregate_type)
    }

    /// Maps `(aggregate_type, aggregate_id)` to a stream name.
    #[must_use]
    pub fn compute_stream_name(&self, aggregate_type: &str, aggregate_id: &str) -> StreamName {
        let base = self
            .overrides
            .get(aggregate_type)
            .map_or(aggregate_type, String::as_str);

        match self.strategy {
            PersistenceStrategy::SingleStream => StreamName::new(base),
            PersistenceStrategy::AggregateStream => {
                StreamName::new(format!("{base}{CATEGORY_SEPARATOR}{aggregate_id}"))
            }
        }
    }
}
