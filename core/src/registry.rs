//! Event-name → handler mapping and the consumer configuration that owns it.
//!
//! The registry is built once while the configuration is assembled and is
//! read-only afterwards: [`Consumer`](crate::consumer::Consumer) takes the
//! configuration by value and shares it immutably with its loop.
//!
//! # Example
//!
//! ```
//! use broker_dispatch_core::event::{Event, EventCatalog};
//! use broker_dispatch_core::handler::{EventHandler, HandlerError, Payload};
//! use broker_dispatch_core::registry::ConsumerConfiguration;
//! use serde::Serialize;
//! use std::future::Future;
//! use std::pin::Pin;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize)]
//! struct UserRegistered { user_name: String }
//! impl Event for UserRegistered {}
//!
//! struct Welcome;
//! impl EventHandler for Welcome {
//!     fn handle(
//!         &self,
//!         _payload: Payload,
//!         _cancel: CancellationToken,
//!     ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = EventCatalog::builder()
//!     .name::<UserRegistered>("UserRegistered")
//!     .build();
//!
//! let configuration = ConsumerConfiguration::new("localhost:9092", "mailer", ["users"])
//!     .register::<UserRegistered, Welcome>(&catalog)?;
//!
//! assert!(configuration.handlers.lookup("UserRegistered").is_some());
//! # Ok(())
//! # }
//! ```

use crate::config::ConsumerSettings;
use crate::error::ConfigError;
use crate::event::{Event, EventCatalog};
use crate::handler::{EventHandler, HandlerId};
use std::collections::{HashMap, HashSet};

/// Mapping from event name to the handler type that processes it.
#[derive(Clone, Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerId>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `event_name` to `handler`. A second registration for the same
    /// name replaces the first.
    pub fn register(&mut self, event_name: impl Into<String>, handler: HandlerId) {
        let event_name = event_name.into();
        if let Some(previous) = self.handlers.insert(event_name.clone(), handler) {
            tracing::debug!(
                event = %event_name,
                previous = previous.type_name(),
                handler = handler.type_name(),
                "Handler registration replaced"
            );
        }
    }

    /// Handler registered for `event_name`, if any.
    #[must_use]
    pub fn lookup(&self, event_name: &str) -> Option<&HandlerId> {
        self.handlers.get(event_name)
    }

    /// Number of registered event names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered event names, in no particular order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Everything a consumer needs: where to connect, what to read, and who handles it.
#[derive(Clone, Debug)]
pub struct ConsumerConfiguration {
    /// Broker address
    pub server: String,
    /// Consumer group id
    pub group_id: String,
    /// Topics to subscribe to, in configuration order (may contain duplicates)
    pub topics: Vec<String>,
    /// Event name → handler mapping
    pub handlers: HandlerRegistry,
}

impl ConsumerConfiguration {
    /// Create a configuration with an empty handler registry.
    #[must_use]
    pub fn new<I, T>(server: impl Into<String>, group_id: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            server: server.into(),
            group_id: group_id.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Create a configuration from loaded settings.
    #[must_use]
    pub fn from_settings(settings: ConsumerSettings) -> Self {
        Self {
            server: settings.server,
            group_id: settings.group_id,
            topics: settings.topics,
            handlers: HandlerRegistry::new(),
        }
    }

    /// Route events of type `E` to handler `H`.
    ///
    /// The event name comes from `catalog`, so a misnamed event is caught
    /// here rather than when messages arrive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEventName`] if `E` has no name in the
    /// catalog, or [`ConfigError::EmptyEventName`] if its name is empty.
    pub fn register<E: Event, H: EventHandler>(
        mut self,
        catalog: &EventCatalog,
    ) -> Result<Self, ConfigError> {
        let event_name = catalog.name_of::<E>()?;
        self.handlers.register(event_name, HandlerId::of::<H>());
        Ok(self)
    }

    /// Route events named `event_name` to `handler` directly.
    #[must_use]
    pub fn register_name(mut self, event_name: impl Into<String>, handler: HandlerId) -> Self {
        self.handlers.register(event_name, handler);
        self
    }

    /// Topics with duplicates removed, keeping first occurrence order.
    #[must_use]
    pub fn unique_topics(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.topics
            .iter()
            .filter(|topic| seen.insert(topic.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, Payload};
    use serde::Serialize;
    use std::future::Future;
    use std::pin::Pin;
    use tokio_util::sync::CancellationToken;

    #[derive(Serialize)]
    struct Valid;
    impl Event for Valid {}

    #[derive(Serialize)]
    struct Unnamed;
    impl Event for Unnamed {}

    #[derive(Serialize)]
    struct Blank;
    impl Event for Blank {}

    struct First;
    struct Second;

    macro_rules! noop_handler {
        ($ty:ty) => {
            impl EventHandler for $ty {
                fn handle(
                    &self,
                    _payload: Payload,
                    _cancel: CancellationToken,
                ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
                    Box::pin(async { Ok(()) })
                }
            }
        };
    }

    noop_handler!(First);
    noop_handler!(Second);

    fn catalog() -> EventCatalog {
        EventCatalog::builder()
            .name::<Valid>("Valid")
            .name::<Blank>("")
            .build()
    }

    fn configuration() -> ConsumerConfiguration {
        ConsumerConfiguration::new("kafkaserver", "groupId", ["NotificationsMicroservices"])
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if registration fails
    fn register_uses_catalog_name() {
        let config = configuration().register::<Valid, First>(&catalog()).unwrap();
        assert_eq!(config.handlers.lookup("Valid"), Some(&HandlerId::of::<First>()));
        assert_eq!(config.handlers.len(), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if registration succeeds
    fn register_fails_for_missing_name() {
        let err = configuration().register::<Unnamed, First>(&catalog()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEventName { .. }));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if registration succeeds
    fn register_fails_for_empty_name() {
        let err = configuration().register::<Blank, First>(&catalog()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEventName { .. }));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if registration fails
    fn last_registration_wins() {
        let config = configuration()
            .register::<Valid, First>(&catalog())
            .unwrap()
            .register::<Valid, Second>(&catalog())
            .unwrap();
        assert_eq!(config.handlers.lookup("Valid"), Some(&HandlerId::of::<Second>()));
        assert_eq!(config.handlers.len(), 1);
    }

    #[test]
    fn lookup_of_unknown_name_is_absent() {
        let config = configuration().register_name("Invalid", HandlerId::untyped::<First>());
        assert!(config.handlers.lookup("Other").is_none());
        assert_eq!(config.handlers.event_names().collect::<Vec<_>>(), vec!["Invalid"]);
    }

    #[test]
    fn unique_topics_preserves_first_occurrence() {
        let config = ConsumerConfiguration::new("s", "g", ["b", "a", "b", "c", "a"]);
        assert_eq!(config.unique_topics(), vec!["b", "a", "c"]);
    }

    #[test]
    fn from_settings_copies_fields() {
        let config = ConsumerConfiguration::from_settings(ConsumerSettings {
            server: "kafka:9092".to_string(),
            group_id: "g".to_string(),
            topics: vec!["t".to_string()],
        });
        assert_eq!(config.server, "kafka:9092");
        assert!(config.handlers.is_empty());
    }
}
