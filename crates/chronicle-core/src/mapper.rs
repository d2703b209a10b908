//! Event-type name mapping between the log and in-process types.

use std::collections::HashMap;

use crate::error::DomainError;

/// Bidirectional mapping between in-process event types and the names
/// written to the log. Unmapped names pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct EventMapper {
    type_to_name: HashMap<String, String>,
    name_to_type: HashMap<String, String>,
}

impl EventMapper {
    /// An identity mapper.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a mapper from `(in-process type, wire name)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Configuration` if a type or a name is declared
    /// twice with different counterparts.
    pub fn from_pairs<I, T, N>(pairs: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (T, N)>,
        T: Into<String>,
        N: Into<String>,
    {
        let mut mapper = Self::default();
        for (event_type, name) in pairs {
            let (event_type, name) = (event_type.into(), name.into());

            if let Some(existing) = mapper.type_to_name.get(&event_type) {
                if *existing != name {
                    return Err(DomainError::Configuration(format!(
                        "event type {event_type} is mapped to both {existing} and {name}"
                    )));
                }
            }
            if let Some(existing) = mapper.name_to_type.get(&name) {
                if *existing != event_type {
                    return Err(DomainError::Configuration(format!(
                        "event name {name} is claimed by both {existing} and {event_type}"
                    )));
                }
            }

            mapper.type_to_name.insert(event_type.clone(), name.clone());
            mapper.name_to_type.insert(name, event_type);
        }
        Ok(mapper)
    }

    /// The name to write for an in-process type.
    #[must_use]
    pub fn to_wire_name<'a>(&'a self, event_type: &'a str) -> &'a str {
        self.type_to_name
            .get(event_type)
            .map_or(event_type, String::as_str)
    }

    /// The in-process type for a name read from the log.
    #[must_use]
    pub fn to_in_process_type<'a>(&'a self, name: &'a str) -> &'a str {
        self.name_to_type.get(name).map_or(name, String::as_str)
    }
}
