//! Kafka producer client.

use broker_dispatch_core::broker::{BrokerError, Delivery, ProducerClient};
use broker_dispatch_core::config::ProducerSettings;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// [`ProducerClient`] backed by an rdkafka [`FutureProducer`].
///
/// Retries are rdkafka's business: `message_send_max_retries` from the
/// settings is passed through as `message.send.max.retries`.
///
/// # Example
///
/// ```no_run
/// use broker_dispatch_core::config::ProducerSettings;
/// use broker_dispatch_kafka::KafkaProducerClient;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = ProducerSettings::new("localhost:9092").with_max_retries(3);
/// let client = KafkaProducerClient::builder(&settings)
///     .producer_acks("all")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaProducerClient {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducerClient {
    /// Create a client from `settings` with default acks and compression.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if rdkafka rejects the configuration.
    pub fn new(settings: &ProducerSettings) -> Result<Self, BrokerError> {
        Self::builder(settings).build()
    }

    /// Start configuring a client from `settings`.
    #[must_use]
    pub fn builder(settings: &ProducerSettings) -> KafkaProducerClientBuilder {
        KafkaProducerClientBuilder {
            settings: settings.clone(),
            producer_acks: None,
            compression: None,
        }
    }
}

/// Builder for a [`KafkaProducerClient`].
#[derive(Debug, Clone)]
pub struct KafkaProducerClientBuilder {
    settings: ProducerSettings,
    producer_acks: Option<String>,
    compression: Option<String>,
}

impl KafkaProducerClientBuilder {
    /// Acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Create the client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if rdkafka rejects the configuration.
    pub fn build(self) -> Result<KafkaProducerClient, BrokerError> {
        let settings = self.settings;
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("message.timeout.ms", settings.timeout_ms.to_string())
            .set("acks", acks)
            .set("compression.type", compression);
        if let Some(retries) = settings.message_send_max_retries {
            config.set("message.send.max.retries", retries.to_string());
        }

        let producer: FutureProducer = config.create().map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %settings.bootstrap_servers,
            acks = acks,
            compression = compression,
            max_retries = ?settings.message_send_max_retries,
            "Kafka producer created"
        );

        Ok(KafkaProducerClient {
            producer,
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }
}

impl ProducerClient for KafkaProducerClient {
    fn produce<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let record = FutureRecord::<(), String>::to(topic).payload(&payload);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => Ok(Delivery { partition, offset }),
                Err((error, _message)) => Err(BrokerError::ProduceFailed {
                    topic: topic.to_string(),
                    reason: failure_reason(&error),
                }),
            }
        })
    }
}

/// The broker's own description of a failure when it has one.
fn failure_reason(error: &KafkaError) -> String {
    error
        .rdkafka_error_code()
        .map_or_else(|| error.to_string(), |code| code.to_string())
}
