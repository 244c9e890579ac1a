//! Handler instantiation, supplied by the embedding application.
//!
//! The consumer never constructs handlers itself. For every message it
//! opens a [`ResolutionScope`], asks it for an instance of the registered
//! handler type, and releases the scope once handling is over, whether the
//! handler succeeded or not. Scopes are never shared across messages.

use crate::handler::{HandlerId, Instance};

/// Factory for per-message resolution scopes.
///
/// Must support concurrent scopes when several consumers share one resolver.
pub trait HandlerResolver: Send + Sync {
    /// Open a new scope.
    fn create_scope(&self) -> Box<dyn ResolutionScope>;
}

/// A bounded resolution context producing handler instances.
pub trait ResolutionScope: Send {
    /// Produce an instance for `handler`, or `None` if nothing is registered for it.
    fn resolve(&self, handler: &HandlerId) -> Option<Instance>;

    /// Dispose of resources owned by the scope.
    ///
    /// Called exactly once, after the handler has run.
    fn release(&mut self) {}
}

/// Owns a scope for the duration of one message and releases it on drop.
pub(crate) struct ScopeGuard {
    scope: Box<dyn ResolutionScope>,
}

impl ScopeGuard {
    pub(crate) fn open(resolver: &dyn HandlerResolver) -> Self {
        Self {
            scope: resolver.create_scope(),
        }
    }

    pub(crate) fn resolve(&self, handler: &HandlerId) -> Option<Instance> {
        self.scope.resolve(handler)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        released: Arc<AtomicUsize>,
    }

    struct CountingScope {
        released: Arc<AtomicUsize>,
    }

    impl HandlerResolver for CountingResolver {
        fn create_scope(&self) -> Box<dyn ResolutionScope> {
            Box::new(CountingScope {
                released: Arc::clone(&self.released),
            })
        }
    }

    impl ResolutionScope for CountingScope {
        fn resolve(&self, _handler: &HandlerId) -> Option<Instance> {
            None
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Anything;

    #[test]
    fn guard_releases_scope_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let resolver = CountingResolver {
            released: Arc::clone(&released),
        };

        {
            let guard = ScopeGuard::open(&resolver);
            assert!(guard.resolve(&HandlerId::untyped::<Anything>()).is_none());
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
