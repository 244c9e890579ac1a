//! Event marker trait and the catalog of logical event names.
//!
//! Every event that crosses the broker carries a logical name in its
//! envelope. Names are attached to event *types*, not instances: the
//! [`EventCatalog`] maps a type identity to its name and is built once at
//! process start, so no lookup work happens per message.
//!
//! # Example
//!
//! ```
//! use broker_dispatch_core::event::{Event, EventCatalog};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct UserRegistered {
//!     user_name: String,
//! }
//!
//! impl Event for UserRegistered {}
//!
//! let catalog = EventCatalog::builder()
//!     .name::<UserRegistered>("UserRegistered")
//!     .build();
//!
//! assert_eq!(catalog.name_of::<UserRegistered>().ok(), Some("UserRegistered"));
//! ```

use serde::Serialize;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A data record that can be sent through the broker or registered with a handler.
///
/// Events carry no broker-specific fields. Their logical name lives in an
/// [`EventCatalog`], keyed by type.
pub trait Event: Serialize + Send + Sync + 'static {}

/// Failure to resolve the logical name of an event type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventNameError {
    /// The type was never given a name in the catalog.
    #[error("Event name missing on {event_type}")]
    Missing {
        /// Rust type name of the event
        event_type: &'static str,
    },

    /// The type was registered, but with an empty name.
    #[error("Event name is empty on {event_type}")]
    Empty {
        /// Rust type name of the event
        event_type: &'static str,
    },
}

#[derive(Clone, Debug)]
struct CatalogEntry {
    event_type: &'static str,
    name: &'static str,
}

/// Immutable mapping from event type identity to logical event name.
///
/// Cheap to clone; all clones share the same snapshot.
#[derive(Clone, Debug, Default)]
pub struct EventCatalog {
    entries: Arc<HashMap<TypeId, CatalogEntry>>,
}

impl EventCatalog {
    /// Start building a catalog.
    #[must_use]
    pub fn builder() -> EventCatalogBuilder {
        EventCatalogBuilder::default()
    }

    /// Resolve the logical name attached to `E`.
    ///
    /// # Errors
    ///
    /// Returns [`EventNameError::Missing`] if `E` was never named and
    /// [`EventNameError::Empty`] if it was named with an empty string.
    pub fn name_of<E: 'static>(&self) -> Result<&'static str, EventNameError> {
        let event_type = type_name::<E>();
        match self.entries.get(&TypeId::of::<E>()) {
            None => Err(EventNameError::Missing { event_type }),
            Some(entry) if entry.name.is_empty() => Err(EventNameError::Empty { event_type }),
            Some(entry) => Ok(entry.name),
        }
    }

    /// Number of named event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog names no event types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`EventCatalog`].
#[derive(Debug, Default)]
pub struct EventCatalogBuilder {
    entries: HashMap<TypeId, CatalogEntry>,
}

impl EventCatalogBuilder {
    /// Attach `name` to the event type `E`.
    ///
    /// Naming the same type twice keeps the last name.
    #[must_use]
    pub fn name<E: Event>(mut self, name: &'static str) -> Self {
        let event_type = type_name::<E>();
        if name.is_empty() {
            tracing::warn!(event_type, "Event type registered with an empty name");
        }
        self.entries
            .insert(TypeId::of::<E>(), CatalogEntry { event_type, name });
        self
    }

    /// Freeze the catalog.
    #[must_use]
    pub fn build(self) -> EventCatalog {
        tracing::debug!(
            events = ?self.entries.values().map(|e| (e.event_type, e.name)).collect::<Vec<_>>(),
            "Event catalog built"
        );
        EventCatalog {
            entries: Arc::new(self.entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Named;
    impl Event for Named {}

    #[derive(Serialize)]
    struct Unnamed;
    impl Event for Unnamed {}

    #[derive(Serialize)]
    struct BlankName;
    impl Event for BlankName {}

    fn catalog() -> EventCatalog {
        EventCatalog::builder()
            .name::<Named>("Named")
            .name::<BlankName>("")
            .build()
    }

    #[test]
    fn resolves_registered_name() {
        assert_eq!(catalog().name_of::<Named>(), Ok("Named"));
    }

    #[test]
    fn missing_and_empty_names_are_distinct() {
        let catalog = catalog();
        assert!(matches!(
            catalog.name_of::<Unnamed>(),
            Err(EventNameError::Missing { .. })
        ));
        assert!(matches!(
            catalog.name_of::<BlankName>(),
            Err(EventNameError::Empty { .. })
        ));
    }

    #[test]
    fn last_name_wins() {
        let catalog = EventCatalog::builder()
            .name::<Named>("First")
            .name::<Named>("Second")
            .build();
        assert_eq!(catalog.name_of::<Named>(), Ok("Second"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if the name resolves
    fn missing_error_names_the_type() {
        let err = EventCatalog::default().name_of::<Unnamed>().unwrap_err();
        assert!(err.to_string().contains("Unnamed"));
    }
}
