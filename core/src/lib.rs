//! # Broker Dispatch Core
//!
//! Event dispatch between a message-broker client and application handlers.
//!
//! Events travel inside a small JSON [`Envelope`](envelope::Envelope): a
//! logical event `name` plus the event serialized as a JSON string in `data`.
//! The [`Producer`](producer::Producer) wraps and sends events; the
//! [`Consumer`](consumer::Consumer) polls messages, routes each one by name
//! to the registered [`EventHandler`](handler::EventHandler), and commits the
//! message only after the handler succeeded.
//!
//! ## Core Concepts
//!
//! - **Event**: a serializable type with a logical name in an [`EventCatalog`](event::EventCatalog)
//! - **Envelope**: `{ "name": ..., "data": "<event JSON>" }` on the wire
//! - **Registry**: event name → handler type, fixed before the consumer starts
//! - **Resolver**: creates handler instances inside a per-message scope
//! - **Hooks**: overridable parsing and error handling of the consumer loop
//!
//! ## Delivery Semantics
//!
//! At-least-once. A message is committed after its handler returns `Ok`, and
//! never otherwise. Messages whose event name has no registered handler are
//! skipped and left uncommitted.
//!
//! ## Example
//!
//! ```ignore
//! use broker_dispatch_core::*;
//!
//! let catalog = EventCatalog::builder()
//!     .name::<UserRegistered>("UserRegistered")
//!     .build();
//!
//! let configuration = ConsumerConfiguration::from_settings(ConsumerSettings::from_env()?)
//!     .register::<UserRegistered, SendWelcomeMail>(&catalog)?;
//!
//! let mut consumer = Consumer::new(client, configuration, resolver);
//! consumer.start(&shutdown).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod hooks;
pub mod producer;
pub mod registry;
pub mod resolver;

pub use broker::{BrokerError, BrokerMessage, ConsumerClient, Delivery, ProducerClient};
pub use config::{ConsumerSettings, ProducerSettings};
pub use consumer::{Consumer, ConsumerState};
pub use envelope::{Envelope, KeyCollision};
pub use error::{ConfigError, DispatchError, DispatchErrorKind, ProducerError};
pub use event::{Event, EventCatalog, EventNameError};
pub use handler::{EventHandler, HandlerError, HandlerId, Instance, Payload};
pub use hooks::{ConsumerHooks, DefaultHooks, LoopControl};
pub use producer::Producer;
pub use registry::{ConsumerConfiguration, HandlerRegistry};
pub use resolver::{HandlerResolver, ResolutionScope};
