//! The consumer: subscribe, poll, dispatch, commit.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Starting ──subscribed──▶ Running
//!    ▲                                           │
//!    └──────── loop exits ◀── Stopping ◀─────────┘
//!                              (stop / parent cancelled / hook stop)
//! ```
//!
//! # Dispatch
//!
//! One sequential loop per consumer. Each iteration polls one message,
//! parses its envelope, looks up the handler by event name, resolves a
//! handler instance in a fresh scope, invokes it, and commits the message
//! only if the handler succeeded. Any failure in an iteration goes to
//! [`ConsumerHooks::on_error`] and the loop moves on; the message stays
//! uncommitted, so redelivery is left to the broker's offset semantics.
//! Messages whose event name is not registered are skipped silently.
//!
//! Cancellation is observed between iterations only. A handler that is
//! already running receives the token and may stop cooperatively.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut consumer = Consumer::new(client, configuration, resolver)
//!     .with_hooks(Arc::new(DefaultHooks));
//!
//! let shutdown = CancellationToken::new();
//! consumer.start(&shutdown).await?;
//! // ...
//! consumer.stop(&CancellationToken::new()).await?;
//! ```

use crate::broker::{BrokerMessage, ConsumerClient};
use crate::envelope::Envelope;
use crate::error::DispatchError;
use crate::handler::HandlerError;
use crate::hooks::{ConsumerHooks, DefaultHooks, LoopControl};
use crate::registry::ConsumerConfiguration;
use crate::resolver::{HandlerResolver, ScopeGuard};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    /// No loop is running
    Stopped,
    /// Loop spawned, subscription in progress
    Starting,
    /// Subscribed and dispatching
    Running,
    /// Stop requested; the loop exits at its next iteration boundary
    Stopping,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// What one iteration did, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Idle,
    Skipped,
    Committed,
}

type LoopResult<C> = (C, Result<(), DispatchError>);

struct RunningLoop<C> {
    token: CancellationToken,
    handle: JoinHandle<LoopResult<C>>,
}

/// Long-lived event consumer driving one broker client.
pub struct Consumer<C: ConsumerClient> {
    configuration: Arc<ConsumerConfiguration>,
    resolver: Arc<dyn HandlerResolver>,
    hooks: Arc<dyn ConsumerHooks>,
    state: Arc<watch::Sender<ConsumerState>>,
    client: Option<C>,
    running: Option<RunningLoop<C>>,
}

impl<C: ConsumerClient> Consumer<C> {
    /// Create a stopped consumer with [`DefaultHooks`].
    #[must_use]
    pub fn new(
        client: C,
        configuration: ConsumerConfiguration,
        resolver: Arc<dyn HandlerResolver>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            configuration: Arc::new(configuration),
            resolver,
            hooks: Arc::new(DefaultHooks),
            state: Arc::new(state),
            client: Some(client),
            running: None,
        }
    }

    /// Replace the loop hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn ConsumerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// The configuration this consumer was built with.
    #[must_use]
    pub fn configuration(&self) -> &ConsumerConfiguration {
        &self.configuration
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Spawn the dispatch loop and return without waiting for the subscription.
    ///
    /// The loop stops when `parent` is cancelled, when [`stop`](Self::stop)
    /// is called, or when a hook calls [`LoopControl::stop`]. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AlreadyStarted`] if a loop is still running.
    /// - [`DispatchError::ClientLost`] if an earlier loop task panicked and
    ///   took the broker client with it.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<(), DispatchError> {
        if let Some(running) = self.running.take() {
            if !running.handle.is_finished() {
                self.running = Some(running);
                return Err(DispatchError::AlreadyStarted);
            }
            // The previous loop ended on its own; collect its client first.
            if let Err(error) = self.reap(running.handle).await {
                tracing::warn!(error = %error, "Previous consumer loop ended with an error");
            }
        }

        let client = self.client.take().ok_or(DispatchError::ClientLost)?;
        let token = parent.child_token();
        self.state.send_replace(ConsumerState::Starting);

        let dispatch = DispatchLoop {
            client,
            configuration: Arc::clone(&self.configuration),
            resolver: Arc::clone(&self.resolver),
            hooks: Arc::clone(&self.hooks),
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(dispatch.run(token.clone()));
        self.running = Some(RunningLoop { token, handle });

        tracing::debug!(group_id = %self.configuration.group_id, "Consumer started");
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A no-op when no loop is running. The message being handled, if any,
    /// finishes first; no further message is polled.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::StopAbandoned`] if `cancel` fires before the loop exits;
    ///   the loop keeps stopping and `stop` may be called again.
    /// - [`DispatchError::Broker`] if the loop never got past subscribing.
    /// - [`DispatchError::TaskFailed`] if the loop task panicked. The broker
    ///   client is gone and later calls to `start` fail with
    ///   [`DispatchError::ClientLost`].
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        self.state.send_if_modified(|state| match state {
            ConsumerState::Starting | ConsumerState::Running => {
                *state = ConsumerState::Stopping;
                true
            },
            ConsumerState::Stopping | ConsumerState::Stopped => false,
        });
        running.token.cancel();

        let joined = tokio::select! {
            biased;
            joined = &mut running.handle => Some(joined),
            () = cancel.cancelled() => None,
        };

        match joined {
            Some(joined) => {
                let result = self.collect(joined);
                tracing::debug!(group_id = %self.configuration.group_id, "Consumer stopped");
                result
            },
            None => {
                self.running = Some(running);
                Err(DispatchError::StopAbandoned)
            },
        }
    }

    async fn reap(&mut self, handle: JoinHandle<LoopResult<C>>) -> Result<(), DispatchError> {
        let joined = handle.await;
        self.collect(joined)
    }

    fn collect(
        &mut self,
        joined: Result<LoopResult<C>, tokio::task::JoinError>,
    ) -> Result<(), DispatchError> {
        match joined {
            Ok((client, result)) => {
                self.client = Some(client);
                result
            },
            Err(join_error) => {
                self.state.send_replace(ConsumerState::Stopped);
                Err(DispatchError::TaskFailed(join_error.to_string()))
            },
        }
    }
}

impl<C: ConsumerClient> Drop for Consumer<C> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
    }
}

/// State moved into the spawned loop task.
struct DispatchLoop<C> {
    client: C,
    configuration: Arc<ConsumerConfiguration>,
    resolver: Arc<dyn HandlerResolver>,
    hooks: Arc<dyn ConsumerHooks>,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl<C: ConsumerClient> DispatchLoop<C> {
    async fn run(mut self, token: CancellationToken) -> LoopResult<C> {
        // Let `start` return before the subscribe call.
        tokio::task::yield_now().await;

        let topics = self.configuration.unique_topics();
        if let Err(error) = self.client.subscribe(&topics) {
            tracing::error!(topics = ?topics, error = %error, "Consumer failed to subscribe");
            self.state.send_replace(ConsumerState::Stopped);
            return (self.client, Err(error.into()));
        }

        tracing::info!(
            topics = ?topics,
            group_id = %self.configuration.group_id,
            server = %self.configuration.server,
            handlers = self.configuration.handlers.len(),
            "Consumer subscribed"
        );

        self.state.send_if_modified(|state| {
            if *state == ConsumerState::Starting {
                *state = ConsumerState::Running;
                true
            } else {
                false
            }
        });

        let control = LoopControl::new(token.clone());
        while !token.is_cancelled() {
            let mut envelope = None;
            match self.dispatch_next(&token, &mut envelope).await {
                Ok(Outcome::Idle) => {},
                Ok(Outcome::Skipped) => {
                    metrics::counter!("broker_dispatch.consumer.skipped").increment(1);
                },
                Ok(Outcome::Committed) => {
                    metrics::counter!("broker_dispatch.consumer.committed").increment(1);
                },
                Err(error) => {
                    metrics::counter!(
                        "broker_dispatch.consumer.failed",
                        "kind" => error.kind().as_str()
                    )
                    .increment(1);
                    self.hooks.on_error(&error, envelope.as_ref(), &control).await;
                },
            }
            // Clients that answer without awaiting must not starve the runtime.
            tokio::task::yield_now().await;
        }

        self.state.send_replace(ConsumerState::Stopping);
        tracing::info!(group_id = %self.configuration.group_id, "Consumer loop exiting");
        self.state.send_replace(ConsumerState::Stopped);

        let Self { client, .. } = self;
        (client, Ok(()))
    }

    /// One iteration. `envelope` receives the parsed envelope as soon as it
    /// exists so the error hook can see it.
    async fn dispatch_next(
        &mut self,
        token: &CancellationToken,
        envelope: &mut Option<Envelope>,
    ) -> Result<Outcome, DispatchError> {
        let Some(message) = self.client.poll(token).await? else {
            return Ok(Outcome::Idle);
        };

        tracing::info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Received message"
        );

        let envelope = &*envelope.insert(self.hooks.parse_envelope(&message)?);
        let Some(event_name) = envelope.event_name() else {
            return Err(DispatchError::InvalidArgument(
                "event name is missing".to_string(),
            ));
        };

        let Some(handler_id) = self.configuration.handlers.lookup(event_name) else {
            tracing::debug!(
                event = event_name,
                position = %message,
                "No handler registered, skipping"
            );
            return Ok(Outcome::Skipped);
        };

        let scope = ScopeGuard::open(self.resolver.as_ref());
        let instance = scope
            .resolve(handler_id)
            .ok_or(DispatchError::HandlerNotFound {
                handler: handler_id.type_name(),
            })?;
        let handler = handler_id
            .as_handler(instance)
            .ok_or(DispatchError::HandlerTypeMismatch {
                handler: handler_id.type_name(),
            })?;

        tracing::debug!(event = event_name, handler = %handler_id, "Dispatching event");

        let payload = envelope.payload()?;
        AssertUnwindSafe(async { handler.handle(payload, token.clone()).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(panic.as_ref())))
            .map_err(|source| DispatchError::Handler {
                event: event_name.to_string(),
                source,
            })?;

        self.commit(&message)?;
        drop(scope);

        Ok(Outcome::Committed)
    }

    fn commit(&mut self, message: &BrokerMessage) -> Result<(), DispatchError> {
        self.client.commit(message)?;
        tracing::debug!(position = %message, "Message committed");
        Ok(())
    }
}

/// A handler panic becomes an ordinary handler failure.
fn panicked(panic: &(dyn Any + Send)) -> HandlerError {
    let reason = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {reason}").into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConsumerState::Stopped.to_string(), "stopped");
        assert_eq!(ConsumerState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panicked(from_str.as_ref()).to_string(), "handler panicked: boom");

        let from_string: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panicked(from_string.as_ref()).to_string(), "handler panicked: bang");

        let opaque: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(
            panicked(opaque.as_ref()).to_string(),
            "handler panicked: unknown panic payload"
        );
    }
}
