//! The capability every event handler implements, and handler identities.
//!
//! Handlers are looked up by event name at runtime, so they receive the
//! event as a loosely-typed JSON object ([`Payload`]) rather than as the
//! original Rust type. Each handler owns the validation of its own payload.
//!
//! # Example
//!
//! ```
//! use broker_dispatch_core::handler::{EventHandler, HandlerError, Payload};
//! use std::future::Future;
//! use std::pin::Pin;
//! use tokio_util::sync::CancellationToken;
//!
//! struct SendWelcomeMail;
//!
//! impl EventHandler for SendWelcomeMail {
//!     fn handle(
//!         &self,
//!         payload: Payload,
//!         _cancel: CancellationToken,
//!     ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
//!         Box::pin(async move {
//!             let user = payload
//!                 .get("userName")
//!                 .and_then(|v| v.as_str())
//!                 .ok_or("userName missing")?;
//!             println!("Welcome, {user}");
//!             Ok::<(), HandlerError>(())
//!         })
//!     }
//! }
//! ```

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loosely-typed event payload handed to handlers.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A resolved handler instance, as produced by a resolution scope.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Handles one kind of event.
///
/// # Dyn Compatibility
///
/// Returns an explicit `Pin<Box<dyn Future>>` so handlers can be used as
/// `Arc<dyn EventHandler>` after resolution.
pub trait EventHandler: Send + Sync + 'static {
    /// Process one event.
    ///
    /// `cancel` fires when the consumer is asked to stop; long-running
    /// handlers should observe it and return early. Returning an error
    /// leaves the message uncommitted.
    ///
    /// # Errors
    ///
    /// Any error the handler chooses to report.
    fn handle(
        &self,
        payload: Payload,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

type Downcast = fn(Instance) -> Option<Arc<dyn EventHandler>>;

/// Identity of a handler type.
///
/// Registered against an event name and handed to the resolution service,
/// which produces an instance for it. An id created with
/// [`HandlerId::of`] knows how to view that instance as an
/// [`EventHandler`]; one created with [`HandlerId::untyped`] does not, and
/// resolving it always ends in a type mismatch.
#[derive(Clone, Copy)]
pub struct HandlerId {
    type_id: TypeId,
    type_name: &'static str,
    downcast: Option<Downcast>,
}

impl HandlerId {
    /// Identity of the handler type `H`.
    #[must_use]
    pub fn of<H: EventHandler>() -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: type_name::<H>(),
            downcast: Some(downcast_to::<H> as Downcast),
        }
    }

    /// Identity of a type that does not implement [`EventHandler`].
    #[must_use]
    pub fn untyped<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            downcast: None,
        }
    }

    /// The underlying `TypeId`.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The Rust type name, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// View a resolved instance as an event handler.
    ///
    /// Returns `None` if the instance is not of this id's type or the type
    /// does not satisfy the handler contract.
    #[must_use]
    pub fn as_handler(&self, instance: Instance) -> Option<Arc<dyn EventHandler>> {
        self.downcast.and_then(|downcast| downcast(instance))
    }
}

fn downcast_to<H: EventHandler>(instance: Instance) -> Option<Arc<dyn EventHandler>> {
    instance
        .downcast::<H>()
        .ok()
        .map(|handler| handler as Arc<dyn EventHandler>)
}

impl PartialEq for HandlerId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for HandlerId {}

impl Hash for HandlerId {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerId")
            .field("type_name", &self.type_name)
            .field("is_handler", &self.downcast.is_some())
            .finish()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
