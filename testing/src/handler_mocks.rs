//! Handler, resolver and hook doubles
//!
//! - [`RecordingHandler`]: records every payload it receives
//! - [`FnHandler`]: runs a closure per event
//! - [`FailingHandler`]: always fails
//! - [`InMemoryResolver`]: resolves registered handlers and counts scopes
//! - [`RecordingHooks`]: records every error the consumer reports

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use broker_dispatch_core::envelope::Envelope;
use broker_dispatch_core::error::{DispatchError, DispatchErrorKind};
use broker_dispatch_core::handler::{EventHandler, HandlerError, HandlerId, Instance, Payload};
use broker_dispatch_core::hooks::{ConsumerHooks, LoopControl, log_dispatch_error};
use broker_dispatch_core::resolver::{HandlerResolver, ResolutionScope};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Handler that records every payload it is given.
///
/// The type parameter only distinguishes handler types, so one test can
/// register several recording handlers under different event names.
///
/// # Example
///
/// ```
/// use broker_dispatch_testing::RecordingHandler;
///
/// struct Users;
/// let handler = RecordingHandler::<Users>::new();
/// assert_eq!(handler.call_count(), 0);
/// ```
pub struct RecordingHandler<T = ()> {
    calls: Arc<Mutex<Vec<Payload>>>,
    _tag: PhantomData<fn() -> T>,
}

impl<T> RecordingHandler<T> {
    /// Create a handler with an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            _tag: PhantomData,
        }
    }

    /// Payloads received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Payload> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of events handled.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl<T> Clone for RecordingHandler<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            _tag: PhantomData,
        }
    }
}

impl<T> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventHandler for RecordingHandler<T> {
    fn handle(
        &self,
        payload: Payload,
        _cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        self.calls.lock().unwrap().push(payload);
        Box::pin(async { Ok(()) })
    }
}

/// Handler that runs a closure for every event.
///
/// Register it with [`InMemoryResolver::register_handler`], which returns
/// the id to route event names to.
pub struct FnHandler<F> {
    handler: Arc<F>,
}

impl<F> FnHandler<F>
where
    F: Fn(Payload) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    /// Wrap `handler`.
    #[must_use]
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<F> Clone for FnHandler<F> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Payload) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(
        &self,
        payload: Payload,
        _cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let result = (self.handler)(payload);
        Box::pin(async move { result })
    }
}

/// Error reported by [`FailingHandler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerFailure(pub String);

/// Handler that fails every event with the same reason.
#[derive(Clone, Debug)]
pub struct FailingHandler {
    reason: String,
    attempts: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Create a handler failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of events this handler was given.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventHandler for FailingHandler {
    fn handle(
        &self,
        _payload: Payload,
        _cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failure = HandlerFailure(self.reason.clone());
        Box::pin(async move { Err(failure.into()) })
    }
}

type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Resolver backed by a type-id → factory map.
///
/// Counts opened and released scopes so tests can check that every scope
/// is released exactly once.
///
/// # Example
///
/// ```
/// use broker_dispatch_testing::{InMemoryResolver, RecordingHandler};
/// use broker_dispatch_core::handler::HandlerId;
///
/// let resolver = InMemoryResolver::new();
/// let id = resolver.register_handler(RecordingHandler::<()>::new());
/// assert_eq!(id, HandlerId::of::<RecordingHandler<()>>());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryResolver {
    factories: Arc<RwLock<HashMap<TypeId, Factory>>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl InMemoryResolver {
    /// Create a resolver with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `handler`'s type to clones of `handler`.
    pub fn register_handler<H: EventHandler + Clone>(&self, handler: H) -> HandlerId {
        let id = HandlerId::of::<H>();
        self.register_instance(&id, handler);
        id
    }

    /// Resolve `handler` to clones of `value`, whatever its type.
    pub fn register_instance<T: Any + Send + Sync + Clone>(&self, handler: &HandlerId, value: T) {
        let factory: Factory = Arc::new(move || Arc::new(value.clone()) as Instance);
        self.factories
            .write()
            .unwrap()
            .insert(handler.type_id(), factory);
    }

    /// Scopes created so far.
    #[must_use]
    pub fn scopes_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Scopes released so far.
    #[must_use]
    pub fn scopes_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl HandlerResolver for InMemoryResolver {
    fn create_scope(&self) -> Box<dyn ResolutionScope> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryScope {
            factories: Arc::clone(&self.factories),
            released: Arc::clone(&self.released),
        })
    }
}

struct InMemoryScope {
    factories: Arc<RwLock<HashMap<TypeId, Factory>>>,
    released: Arc<AtomicUsize>,
}

impl ResolutionScope for InMemoryScope {
    fn resolve(&self, handler: &HandlerId) -> Option<Instance> {
        self.factories
            .read()
            .unwrap()
            .get(&handler.type_id())
            .map(|factory| factory())
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One error observed by [`RecordingHooks`].
#[derive(Clone, Debug)]
pub struct RecordedError {
    /// Classification of the error
    pub kind: DispatchErrorKind,
    /// Rendered error message
    pub message: String,
    /// Envelope being processed, if parsing got that far
    pub envelope: Option<Envelope>,
}

/// Hooks that record every reported error, optionally stopping the loop.
#[derive(Clone, Debug, Default)]
pub struct RecordingHooks {
    errors: Arc<Mutex<Vec<RecordedError>>>,
    stop_on_error: bool,
}

impl RecordingHooks {
    /// Record errors and keep the loop running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record errors and stop the loop at the first one.
    #[must_use]
    pub fn stopping() -> Self {
        Self {
            stop_on_error: true,
            ..Self::default()
        }
    }

    /// Errors recorded so far, in order.
    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        self.errors.lock().unwrap().clone()
    }

    /// Kinds of the errors recorded so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<DispatchErrorKind> {
        self.errors.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl ConsumerHooks for RecordingHooks {
    fn on_error<'a>(
        &'a self,
        error: &'a DispatchError,
        envelope: Option<&'a Envelope>,
        control: &'a LoopControl,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        log_dispatch_error(error, envelope);
        self.errors.lock().unwrap().push(RecordedError {
            kind: error.kind(),
            message: error.to_string(),
            envelope: envelope.cloned(),
        });
        if self.stop_on_error {
            control.stop();
        }
        Box::pin(async {})
    }
}
