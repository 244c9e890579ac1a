//! # Broker Dispatch Testing
//!
//! Testing utilities for `broker-dispatch-core`.
//!
//! This crate provides:
//! - In-memory broker clients that record subscriptions, polls, commits and sends
//! - Handler, resolver and hook doubles
//! - Async test helpers
//! - proptest strategies for event names and payloads
//!
//! ## Example
//!
//! ```ignore
//! use broker_dispatch_testing::*;
//!
//! #[tokio::test]
//! async fn valid_message_is_handled_then_committed() {
//!     let shutdown = CancellationToken::new();
//!     let client = InMemoryConsumerClient::new().stop_after_commit(shutdown.clone());
//!     client.push_envelope("users", &Envelope::new("Valid", r#"{"username":"x"}"#));
//!
//!     let resolver = InMemoryResolver::new();
//!     let handler = RecordingHandler::<()>::new();
//!     let id = resolver.register_handler(handler.clone());
//!
//!     let configuration = ConsumerConfiguration::new("server", "group", ["users"])
//!         .register_name("Valid", id);
//!     let mut consumer = Consumer::new(client.clone(), configuration, Arc::new(resolver));
//!     consumer.start(&shutdown).await?;
//!
//!     assert!(wait_until(Duration::from_secs(1), || client.commits().len() == 1).await);
//! }
//! ```

mod broker_mocks;
mod handler_mocks;

pub use broker_mocks::{InMemoryConsumerClient, InMemoryProducerClient, ProducedMessage};
pub use handler_mocks::{
    FailingHandler, FnHandler, HandlerFailure, InMemoryResolver, RecordedError, RecordingHandler,
    RecordingHooks,
};

/// Async test helpers.
pub mod helpers {
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    /// Install a test-friendly `tracing` subscriber, honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use serde_json::{Map, Value};
    use std::collections::BTreeMap;

    /// Plausible logical event names.
    pub fn event_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Za-z0-9]{0,24}"
    }

    /// `snake_case` identifiers, as Rust field names are written.
    pub fn snake_case_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,7}(_[a-z][a-z0-9]{0,7}){0,3}"
    }

    /// JSON scalars.
    pub fn json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,16}".prop_map(Value::String),
        ]
    }

    /// Flat JSON objects with arbitrary keys.
    pub fn payload() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[A-Za-z_][A-Za-z0-9_]{0,11}", json_scalar(), 0..8)
            .prop_map(|entries: BTreeMap<String, Value>| entries.into_iter().collect())
    }
}

pub use helpers::{init_test_tracing, wait_until};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_until_sees_condition_become_true() {
        let counter = Arc::new(AtomicUsize::new(0));
        let background = Arc::clone(&counter);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            background.store(1, Ordering::SeqCst);
        });

        assert!(wait_until(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn wait_until_gives_up() {
        assert!(!wait_until(Duration::from_millis(5), || false).await);
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
