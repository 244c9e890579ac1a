//! Kafka consumer client.

use broker_dispatch_core::broker::{BrokerError, BrokerMessage, ConsumerClient};
use broker_dispatch_core::registry::ConsumerConfiguration;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(6);

/// [`ConsumerClient`] backed by an rdkafka [`StreamConsumer`].
///
/// Auto-commit is always disabled: offsets are stored only through
/// [`ConsumerClient::commit`], i.e. after a handler succeeded.
///
/// # Example
///
/// ```no_run
/// use broker_dispatch_core::registry::ConsumerConfiguration;
/// use broker_dispatch_kafka::KafkaConsumerClient;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let configuration = ConsumerConfiguration::new("localhost:9092", "mailer", ["users"]);
/// let client = KafkaConsumerClient::builder(&configuration)
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaConsumerClient {
    consumer: StreamConsumer,
    poll_timeout: Duration,
}

impl KafkaConsumerClient {
    /// Create a client for `configuration`'s server and group with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if rdkafka rejects the configuration.
    pub fn new(configuration: &ConsumerConfiguration) -> Result<Self, BrokerError> {
        Self::builder(configuration).build()
    }

    /// Start configuring a client for `configuration`'s server and group.
    #[must_use]
    pub fn builder(configuration: &ConsumerConfiguration) -> KafkaConsumerClientBuilder {
        KafkaConsumerClientBuilder {
            brokers: configuration.server.clone(),
            group_id: configuration.group_id.clone(),
            auto_offset_reset: None,
            session_timeout: None,
            poll_timeout: None,
            overrides: Vec::new(),
        }
    }
}

/// Builder for a [`KafkaConsumerClient`].
#[derive(Debug, Clone)]
pub struct KafkaConsumerClientBuilder {
    brokers: String,
    group_id: String,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    poll_timeout: Option<Duration>,
    overrides: Vec<(String, String)>,
}

impl KafkaConsumerClientBuilder {
    /// Where a new consumer group starts reading: `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// How long one poll waits before reporting that nothing arrived.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set any other librdkafka property. `enable.auto.commit` cannot be overridden.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Create the client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if rdkafka rejects the configuration.
    pub fn build(self) -> Result<KafkaConsumerClient, BrokerError> {
        let auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest");
        let session_timeout = self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT);

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", auto_offset_reset)
            .set("session.timeout.ms", session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config.set("enable.auto.commit", "false");

        let consumer: StreamConsumer = config.create().map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to create consumer: {e}"))
        })?;

        tracing::info!(
            brokers = %self.brokers,
            group_id = %self.group_id,
            auto_offset_reset = auto_offset_reset,
            manual_commit = true,
            "Kafka consumer created"
        );

        Ok(KafkaConsumerClient {
            consumer,
            poll_timeout: self.poll_timeout.unwrap_or(DEFAULT_POLL_TIMEOUT),
        })
    }
}

impl ConsumerClient for KafkaConsumerClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| BrokerError::SubscriptionFailed {
                topics: topics.to_vec(),
                reason: e.to_string(),
            })
    }

    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BrokerMessage>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::select! {
                () = cancel.cancelled() => Ok(None),
                received = tokio::time::timeout(self.poll_timeout, self.consumer.recv()) => {
                    match received {
                        Err(_elapsed) => Ok(None),
                        Ok(Ok(message)) => Ok(Some(to_broker_message(&message))),
                        Ok(Err(e)) => Err(BrokerError::PollFailed(e.to_string())),
                    }
                },
            }
        })
    }

    fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let commit_failed = |reason: String| BrokerError::CommitFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        // The committed offset is the next one to read.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| commit_failed(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))
    }
}

fn to_broker_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    BrokerMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_consumer_client_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<KafkaConsumerClient>();
    }

    #[test]
    fn builder_takes_server_and_group_from_configuration() {
        let configuration = ConsumerConfiguration::new("kafka:9092", "mailer", ["users"]);
        let builder = KafkaConsumerClient::builder(&configuration)
            .auto_offset_reset("earliest")
            .poll_timeout(Duration::from_millis(100))
            .set("client.id", "mailer-1");

        assert_eq!(builder.brokers, "kafka:9092");
        assert_eq!(builder.group_id, "mailer");
        assert_eq!(builder.auto_offset_reset.as_deref(), Some("earliest"));
        assert_eq!(
            builder.overrides,
            vec![("client.id".to_string(), "mailer-1".to_string())]
        );
    }
}
