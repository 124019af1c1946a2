//! Inbound frame dispatch.
//!
//! The connection's reader task parses each text frame into a
//! [`ServerFrame`] and hands it here. The dispatcher fans it out to every
//! handler registered for the frame's [`FrameKind`], synchronously and in
//! registration order.
//!
//! Registration is a paired operation: [`Dispatcher::register`] returns a
//! [`HandlerGuard`] that unregisters on drop, so a dropped conversation can
//! never leave a stale closure mutating state for a view that no longer
//! exists. Handlers for the same kind may coexist (e.g. a global
//! unread-badge listener and an open conversation both subscribed to
//! `chat`); registering the same callback twice means it runs twice.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::{FrameKind, ServerFrame};

/// A subscriber callback for inbound frames.
///
/// Handlers run on the socket reader task and must not block.
pub type FrameHandler = Arc<dyn Fn(&ServerFrame) + Send + Sync>;

/// Registry of frame handlers keyed by frame kind.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<Mutex<HashMap<FrameKind, Vec<FrameHandler>>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a frame kind.
    ///
    /// The handler is appended to the end of the kind's invocation order.
    /// Dropping the returned guard unregisters it; call
    /// [`HandlerGuard::forget`] for a process-lifetime subscription.
    pub fn register(&self, kind: FrameKind, handler: FrameHandler) -> HandlerGuard {
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push(Arc::clone(&handler));

        tracing::trace!(kind = kind.as_str(), "Registered frame handler");

        HandlerGuard {
            dispatcher: self.clone(),
            kind,
            handler,
            active: true,
        }
    }

    /// Remove a handler from a kind's list by callback identity.
    ///
    /// Removes every occurrence of the exact callback; removing the last
    /// handler for a kind deletes the entry. Unknown handlers are a no-op.
    pub fn unregister(&self, kind: FrameKind, handler: &FrameHandler) {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                handlers.remove(&kind);
            }
        }
    }

    /// Fan an inbound frame out to every handler registered for its kind.
    ///
    /// Handlers run synchronously in registration order. Each invocation is
    /// isolated: a panicking handler is logged and the remaining handlers
    /// still run.
    pub fn dispatch(&self, frame: &ServerFrame) {
        let snapshot = {
            let handlers = self.handlers.lock();
            match handlers.get(&frame.kind()) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                tracing::error!(
                    kind = frame.kind().as_str(),
                    "Frame handler panicked; continuing with remaining handlers"
                );
            }
        }
    }

    /// Number of handlers currently registered for a kind.
    pub fn handler_count(&self, kind: FrameKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

/// Scoped registration handle; unregisters its handler on drop.
pub struct HandlerGuard {
    dispatcher: Dispatcher,
    kind: FrameKind,
    handler: FrameHandler,
    active: bool,
}

impl HandlerGuard {
    /// Unregister now instead of at drop time.
    pub fn release(mut self) {
        self.unregister();
    }

    /// Leave the handler registered for the dispatcher's lifetime.
    pub fn forget(mut self) {
        self.active = false;
    }

    fn unregister(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.dispatcher.unregister(self.kind, &self.handler);
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.unregister();
    }
}
