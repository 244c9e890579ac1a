//! Sending events.
//!
//! [`Producer::send`] validates its arguments, looks up the event's logical
//! name, wraps the serialized event in an [`Envelope`] and hands it to the
//! broker client. Broker failures come back as
//! [`ProducerError::SendFailed`] carrying the broker's reason; the producer
//! never retries on its own (configure retries on the broker client).
//!
//! # Example
//!
//! ```rust,ignore
//! let producer = Producer::new(client, catalog);
//! producer.send(&UserRegistered { user_name: "jeremias".into() }, "users").await?;
//! ```

use crate::broker::{BrokerError, Delivery, ProducerClient};
use crate::envelope::{Envelope, camel_case_keys};
use crate::error::ProducerError;
use crate::event::{Event, EventCatalog};
use serde::Serialize;
use std::any::type_name;

/// Publishes events wrapped in envelopes.
pub struct Producer<P> {
    client: P,
    catalog: EventCatalog,
}

impl<P: ProducerClient> Producer<P> {
    /// Create a producer over `client`, naming events through `catalog`.
    #[must_use]
    pub const fn new(client: P, catalog: EventCatalog) -> Self {
        Self { client, catalog }
    }

    /// The underlying broker client.
    #[must_use]
    pub const fn client(&self) -> &P {
        &self.client
    }

    /// Send `event` to `topic`.
    ///
    /// # Errors
    ///
    /// See [`send_opt`](Self::send_opt).
    pub async fn send<E: Event>(&self, event: &E, topic: &str) -> Result<Delivery, ProducerError> {
        self.send_opt(Some(event), topic).await
    }

    /// Send `event` to `topic`, rejecting an absent event.
    ///
    /// All argument checks happen before the broker is contacted.
    ///
    /// # Errors
    ///
    /// - [`ProducerError::MissingEvent`] if `event` is `None`
    /// - [`ProducerError::EmptyTopic`] if `topic` is empty
    /// - [`ProducerError::MissingEventName`] if `E` has no catalog name
    /// - [`ProducerError::EmptyEventName`] if `E`'s catalog name is empty
    /// - [`ProducerError::Serialization`] if the event cannot be serialized
    /// - [`ProducerError::SendFailed`] if the broker rejects the message
    pub async fn send_opt<E: Event>(
        &self,
        event: Option<&E>,
        topic: &str,
    ) -> Result<Delivery, ProducerError> {
        let event = event.ok_or(ProducerError::MissingEvent)?;
        if topic.is_empty() {
            return Err(ProducerError::EmptyTopic);
        }

        let name = self.catalog.name_of::<E>()?;
        let message = encode_event(name, event)?;

        match self.client.produce(topic, message).await {
            Ok(delivery) => {
                metrics::counter!("broker_dispatch.producer.sent").increment(1);
                tracing::info!(
                    topic = %topic,
                    event = name,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Event sent"
                );
                Ok(delivery)
            },
            Err(error) => {
                metrics::counter!("broker_dispatch.producer.failed").increment(1);
                tracing::error!(
                    topic = %topic,
                    event = name,
                    error = %error,
                    "Failed to send event"
                );
                Err(ProducerError::SendFailed {
                    topic: topic.to_string(),
                    reason: broker_reason(error),
                })
            },
        }
    }
}

/// Serialize `event` into envelope text under `name`.
///
/// Event fields are converted to lower-camel-case before being embedded.
///
/// # Errors
///
/// Returns [`ProducerError::Serialization`] if `event` cannot be represented
/// as JSON, or if two of its keys become the same key in lower-camel-case.
pub fn encode_event<E: Serialize>(name: &str, event: &E) -> Result<String, ProducerError> {
    let serialization = |e: serde_json::Error| ProducerError::Serialization {
        event_type: type_name::<E>(),
        reason: e.to_string(),
    };

    let data = serde_json::to_value(event).map_err(serialization)?;
    let data = camel_case_keys(data).map_err(|collision| ProducerError::Serialization {
        event_type: type_name::<E>(),
        reason: collision.to_string(),
    })?;
    let data = serde_json::to_string(&data).map_err(serialization)?;
    Envelope::new(name, data).to_json().map_err(serialization)
}

fn broker_reason(error: BrokerError) -> String {
    match error {
        BrokerError::ProduceFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}
