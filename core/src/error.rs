//! Error types for configuration, sending and dispatching.
//!
//! - [`ConfigError`]: detected while building configuration; fatal at startup.
//! - [`ProducerError`]: returned synchronously from a send; never retried here.
//! - [`DispatchError`]: raised inside one consumer iteration and routed to the
//!   error hook, or returned from consumer lifecycle calls.

use crate::broker::BrokerError;
use crate::event::EventNameError;
use crate::handler::HandlerError;
use thiserror::Error;

/// Errors detected while building configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An event type was registered without a name in the catalog
    #[error("Event name missing on {event_type}")]
    MissingEventName {
        /// Rust type name of the event
        event_type: &'static str,
    },

    /// An event type was registered with an empty name
    #[error("Event name is empty on {event_type}")]
    EmptyEventName {
        /// Rust type name of the event
        event_type: &'static str,
    },

    /// Required setting is missing
    #[error("Configuration missing: {var}")]
    MissingSetting {
        /// Environment variable name
        var: String,
    },

    /// Setting value is invalid
    #[error("Configuration invalid for {var}: {reason}")]
    InvalidSetting {
        /// Environment variable name
        var: String,
        /// Why the value was rejected
        reason: String,
    },
}

impl From<EventNameError> for ConfigError {
    fn from(err: EventNameError) -> Self {
        match err {
            EventNameError::Missing { event_type } => Self::MissingEventName { event_type },
            EventNameError::Empty { event_type } => Self::EmptyEventName { event_type },
        }
    }
}

/// Errors returned by [`Producer::send`](crate::producer::Producer::send).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// No event was supplied
    #[error("Invalid argument: event is missing")]
    MissingEvent,

    /// The destination topic is empty
    #[error("Invalid argument: topic is empty")]
    EmptyTopic,

    /// The event type has no name in the catalog
    #[error("Invalid argument: event name missing on {event_type}")]
    MissingEventName {
        /// Rust type name of the event
        event_type: &'static str,
    },

    /// The event type is named with an empty string
    #[error("Invalid argument: event name is empty on {event_type}")]
    EmptyEventName {
        /// Rust type name of the event
        event_type: &'static str,
    },

    /// The event could not be serialized
    #[error("Failed to serialize event {event_type}: {reason}")]
    Serialization {
        /// Rust type name of the event
        event_type: &'static str,
        /// Serializer message
        reason: String,
    },

    /// The broker rejected or failed to deliver the message
    #[error("Send failed for topic '{topic}': {reason}")]
    SendFailed {
        /// Destination topic
        topic: String,
        /// The broker's reported reason
        reason: String,
    },
}

impl ProducerError {
    /// Whether the send was rejected before any broker interaction because
    /// of a bad argument.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::MissingEvent
                | Self::EmptyTopic
                | Self::MissingEventName { .. }
                | Self::EmptyEventName { .. }
        )
    }
}

impl From<EventNameError> for ProducerError {
    fn from(err: EventNameError) -> Self {
        match err {
            EventNameError::Missing { event_type } => Self::MissingEventName { event_type },
            EventNameError::Empty { event_type } => Self::EmptyEventName { event_type },
        }
    }
}

/// Coarse classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    /// Envelope or payload could not be parsed
    Parse,
    /// Envelope is missing its event name
    InvalidArgument,
    /// The resolution service produced no handler instance
    NotFound,
    /// The resolved instance does not satisfy the handler contract
    TypeMismatch,
    /// The handler itself failed
    Handler,
    /// The broker client failed
    Broker,
    /// Consumer start/stop misuse or loop task failure
    Lifecycle,
}

impl DispatchErrorKind {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::TypeMismatch => "type_mismatch",
            Self::Handler => "handler",
            Self::Broker => "broker",
            Self::Lifecycle => "lifecycle",
        }
    }
}

/// Errors raised by the consumer.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The message or its event data is not valid envelope text
    #[error("Parse failed: {0}")]
    Parse(String),

    /// The envelope carries no event name
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No handler instance could be resolved
    #[error("No handler found for type <{handler}>")]
    HandlerNotFound {
        /// Registered handler type
        handler: &'static str,
    },

    /// The resolved instance is not an event handler
    #[error("Handler <{handler}> does not implement EventHandler")]
    HandlerTypeMismatch {
        /// Registered handler type
        handler: &'static str,
    },

    /// The handler returned an error
    #[error("Handler for event '{event}' failed: {source}")]
    Handler {
        /// Event name being handled
        event: String,
        /// The handler's error
        #[source]
        source: HandlerError,
    },

    /// The broker client failed
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// `start` was called while the consumer was not stopped
    #[error("Consumer is already started")]
    AlreadyStarted,

    /// The caller gave up waiting for the loop to stop
    #[error("Stop abandoned before the consumer loop exited")]
    StopAbandoned,

    /// The loop task panicked or was aborted
    #[error("Consumer loop task failed: {0}")]
    TaskFailed(String),

    /// The broker client went down with a failed loop task; the consumer
    /// cannot be started again
    #[error("Broker client was lost with a failed consumer loop")]
    ClientLost,
}

impl DispatchError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> DispatchErrorKind {
        match self {
            Self::Parse(_) => DispatchErrorKind::Parse,
            Self::InvalidArgument(_) => DispatchErrorKind::InvalidArgument,
            Self::HandlerNotFound { .. } => DispatchErrorKind::NotFound,
            Self::HandlerTypeMismatch { .. } => DispatchErrorKind::TypeMismatch,
            Self::Handler { .. } => DispatchErrorKind::Handler,
            Self::Broker(_) => DispatchErrorKind::Broker,
            Self::AlreadyStarted
            | Self::StopAbandoned
            | Self::TaskFailed(_)
            | Self::ClientLost => DispatchErrorKind::Lifecycle,
        }
    }
}
