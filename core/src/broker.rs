//! The message-broker client as seen by the dispatch layer.
//!
//! Connection management, partition assignment and offset storage all live
//! behind these traits. `broker-dispatch-kafka` implements them on top of
//! rdkafka; `broker-dispatch-testing` provides in-memory doubles.
//!
//! A [`ConsumerClient`] is a single-owner handle: it is moved into exactly one
//! consumer loop and used from there only, hence `&mut self` everywhere.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors reported by broker client implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to create or connect the client
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive the next message
    #[error("Poll failed: {0}")]
    PollFailed(String),

    /// Failed to commit a message offset
    #[error("Commit failed for {topic}/{partition}@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Failed to produce a message
    #[error("Produce failed for topic '{topic}': {reason}")]
    ProduceFailed {
        /// The topic that failed
        topic: String,
        /// The broker's reported reason
        reason: String,
    },
}

/// A message received from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Partition the message was read from
    pub partition: i32,
    /// Offset of the message within its partition
    pub offset: i64,
    /// Raw message value, if any
    pub payload: Option<Vec<u8>>,
}

impl BrokerMessage {
    /// Create a message with a text payload.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload: Some(payload.into().into_bytes()),
        }
    }
}

impl fmt::Display for BrokerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Where a produced message landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Partition the message was written to
    pub partition: i32,
    /// Offset assigned by the broker
    pub offset: i64,
}

/// Receiving side of a broker client.
pub trait ConsumerClient: Send + 'static {
    /// Subscribe to `topics`, replacing any previous subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the broker rejects the subscription.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived within the client's poll
    /// window or `cancel` fired while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PollFailed`] on transport errors.
    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BrokerMessage>, BrokerError>> + Send + 'a>>;

    /// Mark `message` as processed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::CommitFailed`] if the offset cannot be stored.
    fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

/// Sending side of a broker client.
pub trait ProducerClient: Send + Sync {
    /// Produce `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ProduceFailed`] carrying the broker's reason.
    fn produce<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + 'a>>;
}
