//! Kafka broker clients for `broker-dispatch-core`.
//!
//! - [`KafkaConsumerClient`]: a [`ConsumerClient`](broker_dispatch_core::broker::ConsumerClient)
//!   over an rdkafka `StreamConsumer` with manual offset commits
//! - [`KafkaProducerClient`]: a [`ProducerClient`](broker_dispatch_core::broker::ProducerClient)
//!   over an rdkafka `FutureProducer`
//!
//! Works with any Kafka-compatible broker (Apache Kafka, Redpanda, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once**:
//! - Auto-commit is disabled; the consumer loop commits a message only
//!   after its handler succeeded
//! - A commit stores `offset + 1`, the next offset to read
//! - Uncommitted messages are redelivered after a restart or rebalance,
//!   so handlers must be idempotent
//!
//! # Example
//!
//! ```no_run
//! use broker_dispatch_core::config::{ConsumerSettings, ProducerSettings};
//! use broker_dispatch_core::registry::ConsumerConfiguration;
//! use broker_dispatch_core::event::EventCatalog;
//! use broker_dispatch_kafka::{kafka_consumer, kafka_producer};
//! use broker_dispatch_testing::InMemoryResolver;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = EventCatalog::builder().build();
//! let configuration = ConsumerConfiguration::from_settings(ConsumerSettings::from_env()?);
//! let consumer = kafka_consumer(configuration, Arc::new(InMemoryResolver::new()))?;
//! let producer = kafka_producer(&ProducerSettings::from_env()?, catalog)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod producer;

pub use consumer::{KafkaConsumerClient, KafkaConsumerClientBuilder};
pub use producer::{KafkaProducerClient, KafkaProducerClientBuilder};

use broker_dispatch_core::broker::BrokerError;
use broker_dispatch_core::config::ProducerSettings;
use broker_dispatch_core::consumer::Consumer;
use broker_dispatch_core::event::EventCatalog;
use broker_dispatch_core::producer::Producer;
use broker_dispatch_core::registry::ConsumerConfiguration;
use broker_dispatch_core::resolver::HandlerResolver;
use std::sync::Arc;

/// A consumer reading from Kafka with default client settings.
///
/// # Errors
///
/// Returns [`BrokerError::ConnectionFailed`] if the Kafka client cannot be created.
pub fn kafka_consumer(
    configuration: ConsumerConfiguration,
    resolver: Arc<dyn HandlerResolver>,
) -> Result<Consumer<KafkaConsumerClient>, BrokerError> {
    let client = KafkaConsumerClient::new(&configuration)?;
    Ok(Consumer::new(client, configuration, resolver))
}

/// A producer writing to Kafka.
///
/// # Errors
///
/// Returns [`BrokerError::ConnectionFailed`] if the Kafka client cannot be created.
pub fn kafka_producer(
    settings: &ProducerSettings,
    catalog: EventCatalog,
) -> Result<Producer<KafkaProducerClient>, BrokerError> {
    Ok(Producer::new(KafkaProducerClient::new(settings)?, catalog))
}
