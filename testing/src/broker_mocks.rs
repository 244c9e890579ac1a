//! In-memory broker clients
//!
//! Provides deterministic stand-ins for a real broker connection:
//! - [`InMemoryConsumerClient`]: a message queue that records subscriptions, polls and commits
//! - [`InMemoryProducerClient`]: records produced messages and can fail on demand
//!
//! Both are cheap to clone; clones share state, so a test keeps one clone
//! for assertions while the consumer or producer owns the other.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use broker_dispatch_core::broker::{
    BrokerError, BrokerMessage, ConsumerClient, Delivery, ProducerClient,
};
use broker_dispatch_core::envelope::Envelope;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long an empty poll waits before reporting "nothing arrived".
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct ConsumerLog {
    queue: VecDeque<BrokerMessage>,
    next_offset: i64,
    subscriptions: Vec<Vec<String>>,
    polls: usize,
    commits: Vec<BrokerMessage>,
    poll_failures: VecDeque<String>,
    subscribe_failure: Option<String>,
    commit_failure: Option<String>,
    stop_after_commit: Option<CancellationToken>,
    stop_when_drained: Option<CancellationToken>,
}

/// In-memory consumer client for fast, deterministic consumer tests.
///
/// # Example
///
/// ```
/// use broker_dispatch_testing::InMemoryConsumerClient;
///
/// let client = InMemoryConsumerClient::new();
/// client.push_raw("users", r#"{"name":"Valid","data":"{}"}"#);
/// assert_eq!(client.pending(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryConsumerClient {
    log: Arc<Mutex<ConsumerLog>>,
}

impl InMemoryConsumerClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `envelope` on `topic`.
    pub fn push_envelope(&self, topic: &str, envelope: &Envelope) {
        self.push_raw(topic, envelope.to_json().unwrap());
    }

    /// Queue a message with an arbitrary text payload on `topic`.
    pub fn push_raw(&self, topic: &str, payload: impl Into<String>) {
        let mut log = self.log.lock().unwrap();
        let offset = log.next_offset;
        log.next_offset += 1;
        log.queue.push_back(BrokerMessage::new(topic, 0, offset, payload));
    }

    /// Queue a fully specified message.
    pub fn push_message(&self, message: BrokerMessage) {
        self.log.lock().unwrap().queue.push_back(message);
    }

    /// Cancel `token` after every successful commit.
    #[must_use]
    pub fn stop_after_commit(self, token: CancellationToken) -> Self {
        self.log.lock().unwrap().stop_after_commit = Some(token);
        self
    }

    /// Cancel `token` once a poll finds the queue empty.
    #[must_use]
    pub fn stop_when_drained(self, token: CancellationToken) -> Self {
        self.log.lock().unwrap().stop_when_drained = Some(token);
        self
    }

    /// Make the next poll fail with `reason`.
    pub fn fail_next_poll(&self, reason: impl Into<String>) {
        self.log.lock().unwrap().poll_failures.push_back(reason.into());
    }

    /// Make every subscribe call fail with `reason`.
    pub fn fail_subscribe(&self, reason: impl Into<String>) {
        self.log.lock().unwrap().subscribe_failure = Some(reason.into());
    }

    /// Make every commit fail with `reason`.
    pub fn fail_commit(&self, reason: impl Into<String>) {
        self.log.lock().unwrap().commit_failure = Some(reason.into());
    }

    /// Every topic list passed to `subscribe`, in call order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().subscriptions.clone()
    }

    /// Number of poll calls, including empty ones.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.log.lock().unwrap().polls
    }

    /// Messages committed so far, in commit order.
    #[must_use]
    pub fn commits(&self) -> Vec<BrokerMessage> {
        self.log.lock().unwrap().commits.clone()
    }

    /// Messages still waiting to be polled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.log.lock().unwrap().queue.len()
    }
}

impl ConsumerClient for InMemoryConsumerClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let mut log = self.log.lock().unwrap();
        log.subscriptions.push(topics.to_vec());
        match &log.subscribe_failure {
            Some(reason) => Err(BrokerError::SubscriptionFailed {
                topics: topics.to_vec(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BrokerMessage>, BrokerError>> + Send + 'a>> {
        let next = {
            let mut log = self.log.lock().unwrap();
            log.polls += 1;
            if let Some(reason) = log.poll_failures.pop_front() {
                Err(BrokerError::PollFailed(reason))
            } else {
                let next = log.queue.pop_front();
                if next.is_none() {
                    if let Some(token) = &log.stop_when_drained {
                        token.cancel();
                    }
                }
                Ok(next)
            }
        };

        Box::pin(async move {
            if let Ok(None) = next {
                tokio::select! {
                    () = cancel.cancelled() => {},
                    () = tokio::time::sleep(IDLE_POLL) => {},
                }
            }
            next
        })
    }

    fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut log = self.log.lock().unwrap();
        if let Some(reason) = &log.commit_failure {
            return Err(BrokerError::CommitFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason: reason.clone(),
            });
        }
        log.commits.push(message.clone());
        if let Some(token) = &log.stop_after_commit {
            token.cancel();
        }
        Ok(())
    }
}

/// A message captured by [`InMemoryProducerClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducedMessage {
    /// Destination topic
    pub topic: String,
    /// Envelope text as sent
    pub payload: String,
}

impl ProducedMessage {
    /// Parse the payload back into an envelope.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope::from_json(&self.payload).unwrap()
    }
}

#[derive(Debug, Default)]
struct ProducerLog {
    sent: Vec<ProducedMessage>,
    failure: Option<String>,
    forward: Option<InMemoryConsumerClient>,
}

/// In-memory producer client that records every produced message.
///
/// # Example
///
/// ```
/// use broker_dispatch_testing::InMemoryProducerClient;
///
/// let client = InMemoryProducerClient::new();
/// client.fail_with("Broker: Broker not available");
/// assert!(client.sent().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProducerClient {
    log: Arc<Mutex<ProducerLog>>,
}

impl InMemoryProducerClient {
    /// Create a client that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent send with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.log.lock().unwrap().failure = Some(reason.into());
    }

    /// Also queue every produced message on `consumer`.
    #[must_use]
    pub fn forward_to(self, consumer: &InMemoryConsumerClient) -> Self {
        self.log.lock().unwrap().forward = Some(consumer.clone());
        self
    }

    /// Messages produced so far, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<ProducedMessage> {
        self.log.lock().unwrap().sent.clone()
    }
}

impl ProducerClient for InMemoryProducerClient {
    fn produce<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, BrokerError>> + Send + 'a>> {
        let result = {
            let mut log = self.log.lock().unwrap();
            if let Some(reason) = &log.failure {
                Err(BrokerError::ProduceFailed {
                    topic: topic.to_string(),
                    reason: reason.clone(),
                })
            } else {
                if let Some(consumer) = &log.forward {
                    consumer.push_raw(topic, payload.clone());
                }
                let offset = i64::try_from(log.sent.len()).unwrap_or(i64::MAX);
                log.sent.push(ProducedMessage {
                    topic: topic.to_string(),
                    payload,
                });
                Ok(Delivery {
                    partition: 0,
                    offset,
                })
            }
        };

        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_messages_poll_in_order_with_offsets() {
        let mut client = InMemoryConsumerClient::new();
        client.push_raw("a", "one");
        client.push_raw("b", "two");
        let cancel = CancellationToken::new();

        let first = client.poll(&cancel).await.unwrap().unwrap();
        let second = client.poll(&cancel).await.unwrap().unwrap();
        assert_eq!((first.topic.as_str(), first.offset), ("a", 0));
        assert_eq!((second.topic.as_str(), second.offset), ("b", 1));
        assert!(client.poll(&cancel).await.unwrap().is_none());
        assert_eq!(client.poll_count(), 3);
    }

    #[tokio::test]
    async fn commit_cancels_stop_token() {
        let token = CancellationToken::new();
        let mut client = InMemoryConsumerClient::new().stop_after_commit(token.clone());
        client.commit(&BrokerMessage::new("t", 0, 0, "{}")).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(client.commits().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_broker_errors() {
        let mut client = InMemoryConsumerClient::new();
        client.fail_next_poll("transport down");
        client.fail_commit("rebalance");
        let cancel = CancellationToken::new();

        assert!(matches!(
            client.poll(&cancel).await,
            Err(BrokerError::PollFailed(_))
        ));
        assert!(matches!(
            client.commit(&BrokerMessage::new("t", 0, 0, "{}")),
            Err(BrokerError::CommitFailed { .. })
        ));
        assert!(client.commits().is_empty());
    }

    #[tokio::test]
    async fn producer_forwards_to_consumer() {
        let consumer = InMemoryConsumerClient::new();
        let producer = InMemoryProducerClient::new().forward_to(&consumer);

        let delivery = producer.produce("users", "{}".to_string()).await.unwrap();
        assert_eq!(delivery.offset, 0);
        assert_eq!(consumer.pending(), 1);
        assert_eq!(producer.sent()[0].topic, "users");
    }

    #[tokio::test]
    async fn producer_failure_carries_reason() {
        let producer = InMemoryProducerClient::new();
        producer.fail_with("Broker: Broker not available");

        let err = producer.produce("users", "{}".to_string()).await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::ProduceFailed {
                topic: "users".to_string(),
                reason: "Broker: Broker not available".to_string(),
            }
        );
        assert!(producer.sent().is_empty());
    }
}
