//! Producer validation, failure reporting and the producer → consumer round trip.

#![allow(clippy::unwrap_used)]

use broker_dispatch_core::consumer::{Consumer, ConsumerState};
use broker_dispatch_core::envelope::Envelope;
use broker_dispatch_core::error::ProducerError;
use broker_dispatch_core::event::{Event, EventCatalog};
use broker_dispatch_core::producer::{Producer, encode_event};
use broker_dispatch_core::registry::ConsumerConfiguration;
use broker_dispatch_testing::properties::{event_name, json_scalar, payload, snake_case_key};
use broker_dispatch_testing::{
    InMemoryConsumerClient, InMemoryProducerClient, InMemoryResolver, RecordingHandler,
    RecordingHooks,
};
use proptest::prelude::*;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "NotificationsMicroservices";

#[derive(Serialize)]
struct ValidEvent {
    username: String,
}
impl Event for ValidEvent {}

#[derive(Serialize)]
struct UnnamedEvent;
impl Event for UnnamedEvent {}

#[derive(Serialize)]
struct BlankNameEvent;
impl Event for BlankNameEvent {}

#[derive(Serialize)]
struct UserRegistered {
    user_name: String,
    home_address: String,
}
impl Event for UserRegistered {}

#[derive(Serialize)]
struct ShadowedField {
    user_name: String,
    #[serde(rename = "userName")]
    display_name: String,
}
impl Event for ShadowedField {}

/// Maps with non-string keys have no JSON form.
#[derive(Serialize)]
struct Unserializable {
    grid: HashMap<(u8, u8), u8>,
}
impl Event for Unserializable {}

fn catalog() -> EventCatalog {
    EventCatalog::builder()
        .name::<ValidEvent>("Valid")
        .name::<BlankNameEvent>("")
        .name::<UserRegistered>("UserRegistered")
        .name::<Unserializable>("Unserializable")
        .name::<ShadowedField>("ShadowedField")
        .build()
}

fn valid_event() -> ValidEvent {
    ValidEvent {
        username: "jeremias".to_string(),
    }
}

#[tokio::test]
async fn send_wraps_event_in_named_envelope() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());

    let delivery = assert_ok!(producer.send(&valid_event(), TOPIC).await);

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, TOPIC);
    assert_eq!(delivery.offset, 0);

    let envelope = sent[0].envelope();
    assert_eq!(envelope.event_name(), Some("Valid"));
    let data: Value = serde_json::from_str(&envelope.data).unwrap();
    assert_eq!(data, json!({ "username": "jeremias" }));
}

#[tokio::test]
async fn absent_event_is_rejected_before_sending() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());

    let err = assert_err!(producer.send_opt::<ValidEvent>(None, TOPIC).await);

    assert_eq!(err, ProducerError::MissingEvent);
    assert!(err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn empty_topic_is_rejected_before_sending() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());

    let err = assert_err!(producer.send(&valid_event(), "").await);

    assert_eq!(err, ProducerError::EmptyTopic);
    assert!(err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn event_without_catalog_name_is_rejected() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());

    let err = assert_err!(producer.send(&UnnamedEvent, TOPIC).await);

    assert!(matches!(err, ProducerError::MissingEventName { .. }));
    assert!(err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn event_with_empty_catalog_name_is_rejected() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());

    let err = assert_err!(producer.send(&BlankNameEvent, TOPIC).await);

    assert!(matches!(err, ProducerError::EmptyEventName { .. }));
    assert!(err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn unserializable_event_is_rejected() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());
    let mut grid = HashMap::new();
    grid.insert((0, 0), 1);

    let err = assert_err!(producer.send(&Unserializable { grid }, TOPIC).await);

    assert!(matches!(err, ProducerError::Serialization { .. }));
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn event_sends_exactly_its_fields_in_camel_case() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());
    let event = UserRegistered {
        user_name: "jeremias".to_string(),
        home_address: "Main Street".to_string(),
    };

    assert_ok!(producer.send(&event, "users").await);

    let payload = client.sent()[0].envelope().payload().unwrap();
    assert_eq!(
        Value::Object(payload),
        json!({ "userName": "jeremias", "homeAddress": "Main Street" })
    );
}

#[tokio::test]
async fn fields_colliding_in_camel_case_are_rejected_before_sending() {
    let client = InMemoryProducerClient::new();
    let producer = Producer::new(client.clone(), catalog());
    let event = ShadowedField {
        user_name: "jeremias".to_string(),
        display_name: "Jeremias".to_string(),
    };

    let err = assert_err!(producer.send(&event, TOPIC).await);

    assert!(matches!(
        err,
        ProducerError::Serialization { ref reason, .. } if reason.contains("userName")
    ));
    assert!(!err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn broker_failure_carries_broker_reason() {
    let client = InMemoryProducerClient::new();
    client.fail_with("Broker: Broker not available");
    let producer = Producer::new(client.clone(), catalog());

    let err = assert_err!(producer.send(&valid_event(), TOPIC).await);

    assert_eq!(
        err,
        ProducerError::SendFailed {
            topic: TOPIC.to_string(),
            reason: "Broker: Broker not available".to_string(),
        }
    );
    assert!(!err.is_invalid_argument());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn sent_event_reaches_its_registered_handler() {
    let shutdown = CancellationToken::new();
    let consumer_client = InMemoryConsumerClient::new().stop_after_commit(shutdown.clone());
    let producer = Producer::new(
        InMemoryProducerClient::new().forward_to(&consumer_client),
        catalog(),
    );

    let resolver = InMemoryResolver::new();
    let handler = RecordingHandler::<UserRegistered>::new();
    resolver.register_handler(handler.clone());
    let configuration = ConsumerConfiguration::new("kafkaserver", "groupId", ["users"])
        .register::<UserRegistered, RecordingHandler<UserRegistered>>(&catalog())
        .unwrap();
    let hooks = RecordingHooks::new();
    let mut consumer = Consumer::new(consumer_client.clone(), configuration, Arc::new(resolver))
        .with_hooks(Arc::new(hooks.clone()));

    let event = UserRegistered {
        user_name: "jeremias".to_string(),
        home_address: "Main Street".to_string(),
    };
    assert_ok!(producer.send(&event, "users").await);

    assert_ok!(consumer.start(&shutdown).await);
    let mut states = consumer.state_changes();
    let stopped = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConsumerState::Stopped),
    )
    .await
    .map(|changed| changed.is_ok());
    assert_eq!(stopped, Ok(true));
    assert_ok!(consumer.stop(&CancellationToken::new()).await);

    assert_eq!(handler.call_count(), 1);
    assert_eq!(handler.calls()[0].get("userName"), Some(&json!("jeremias")));
    assert_eq!(consumer_client.commits().len(), 1);
    assert!(hooks.errors().is_empty());
}

/// Independent of the crate's conversion: join snake_case segments with
/// each later segment capitalised.
fn expected_camel_case(key: &str) -> String {
    let mut segments = key.split('_');
    let mut out = segments.next().unwrap_or_default().to_string();
    for segment in segments {
        let mut chars = segment.chars();
        if let Some(head) = chars.next() {
            out.extend(head.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

proptest! {
    #[test]
    fn encoded_payload_keeps_every_field_under_its_camel_case_key(
        name in event_name(),
        fields in prop::collection::btree_map(snake_case_key(), json_scalar(), 0..8),
    ) {
        let text = encode_event(&name, &fields).unwrap();
        let envelope = Envelope::from_json(&text).unwrap();
        let payload = envelope.payload().unwrap();

        prop_assert_eq!(envelope.event_name(), Some(name.as_str()));
        prop_assert_eq!(payload.len(), fields.len());
        for (key, value) in &fields {
            prop_assert_eq!(payload.get(&expected_camel_case(key)), Some(value));
        }
    }

    #[test]
    fn arbitrary_keys_are_never_silently_merged(fields in payload()) {
        match encode_event("Arbitrary", &fields) {
            Ok(text) => {
                let payload = Envelope::from_json(&text).unwrap().payload().unwrap();
                prop_assert_eq!(payload.len(), fields.len());
                let mut values: Vec<String> = payload.values().map(ToString::to_string).collect();
                let mut expected: Vec<String> = fields.values().map(ToString::to_string).collect();
                values.sort();
                expected.sort();
                prop_assert_eq!(values, expected);
            },
            Err(err) => {
                let is_serialization = matches!(err, ProducerError::Serialization { .. });
                prop_assert!(is_serialization);
            },
        }
    }
}
