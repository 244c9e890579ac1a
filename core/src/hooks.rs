//! Extension points of the consumer loop.
//!
//! [`ConsumerHooks`] has default implementations for every method; override
//! only what you need. A common override turns a failure into a stop:
//!
//! ```
//! use broker_dispatch_core::envelope::Envelope;
//! use broker_dispatch_core::error::DispatchError;
//! use broker_dispatch_core::hooks::{ConsumerHooks, LoopControl, log_dispatch_error};
//! use std::future::Future;
//! use std::pin::Pin;
//!
//! struct StopOnError;
//!
//! impl ConsumerHooks for StopOnError {
//!     fn on_error<'a>(
//!         &'a self,
//!         error: &'a DispatchError,
//!         envelope: Option<&'a Envelope>,
//!         control: &'a LoopControl,
//!     ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
//!         Box::pin(async move {
//!             log_dispatch_error(error, envelope);
//!             control.stop();
//!         })
//!     }
//! }
//! ```

use crate::broker::BrokerMessage;
use crate::envelope::Envelope;
use crate::error::DispatchError;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Handle given to hooks for steering the loop.
#[derive(Debug, Clone)]
pub struct LoopControl {
    token: CancellationToken,
}

impl LoopControl {
    /// Control bound to `token`. The consumer creates one per loop run.
    #[must_use]
    pub const fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Ask the loop to stop; it exits before polling the next message.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop has been requested, by anyone.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The loop's cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.token
    }
}

/// Overridable steps of the dispatch loop.
pub trait ConsumerHooks: Send + Sync + 'static {
    /// Turn a raw broker message into an envelope.
    ///
    /// # Errors
    ///
    /// Default: [`DispatchError::Parse`] if the message has no payload, is not
    /// UTF-8, or is not envelope JSON.
    fn parse_envelope(&self, message: &BrokerMessage) -> Result<Envelope, DispatchError> {
        parse_message(message)
    }

    /// Called for every error raised while processing a message.
    ///
    /// `envelope` is `None` when the failure happened before or during
    /// parsing. Default: [`log_dispatch_error`].
    fn on_error<'a>(
        &'a self,
        error: &'a DispatchError,
        envelope: Option<&'a Envelope>,
        _control: &'a LoopControl,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        log_dispatch_error(error, envelope);
        Box::pin(async {})
    }
}

/// Hooks with every default in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ConsumerHooks for DefaultHooks {}

/// Default envelope parsing: UTF-8 payload, JSON envelope.
///
/// # Errors
///
/// Returns [`DispatchError::Parse`] if the message cannot be read as an envelope.
pub fn parse_message(message: &BrokerMessage) -> Result<Envelope, DispatchError> {
    let payload = message
        .payload
        .as_deref()
        .ok_or_else(|| DispatchError::Parse("Message has no payload".to_string()))?;
    let text = std::str::from_utf8(payload)
        .map_err(|e| DispatchError::Parse(format!("Message payload is not UTF-8: {e}")))?;
    Envelope::from_json(text)
}

/// Default error reporting: one error-level event with the envelope attached.
pub fn log_dispatch_error(error: &DispatchError, envelope: Option<&Envelope>) {
    match envelope {
        Some(envelope) => tracing::error!(
            error = %error,
            kind = error.kind().as_str(),
            event = envelope.name.as_deref().unwrap_or_default(),
            envelope = ?envelope,
            "Error consuming message from the broker"
        ),
        None => tracing::error!(
            error = %error,
            kind = error.kind().as_str(),
            "Error consuming message from the broker"
        ),
    }
}
