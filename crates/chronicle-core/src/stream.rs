//! Stream naming primitives.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between a stream's category and the rest of its name.
pub const CATEGORY_SEPARATOR: char = '-';

/// Prefix reserved for internal streams; excluded from all-stream reads.
pub const INTERNAL_STREAM_PREFIX: char = '$';

/// Name of an append-only stream, unique within one store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Wraps a raw stream name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the raw name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The category: everything before the first `-`, if the name has one.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.0
            .split_once(CATEGORY_SEPARATOR)
            .map(|(category, _)| category)
    }

    /// Whether this is an internal stream (leading `$`).
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.0.starts_with(INTERNAL_STREAM_PREFIX)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StreamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which streams a projection consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// Every non-internal stream in the store.
    All,
    /// An explicit list of stream names.
    Streams(Vec<StreamName>),
    /// Every stream whose category is in the list.
    Categories(Vec<String>),
}

impl StreamSource {
    /// Whether `stream` belongs to this source.
    #[must_use]
    pub fn includes(&self, stream: &StreamName) -> bool {
        match self {
            Self::All => !stream.is_internal(),
            Self::Streams(names) => names.contains(stream),
            Self::Categories(categories) => stream
                .category()
                .is_some_and(|category| categories.iter().any(|c| c == category)),
        }
    }
}
