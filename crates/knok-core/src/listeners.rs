use std::sync::{Arc, RwLock};

use crate::handles::{PublisherHandle, SubscriberHandle};

/// Receives the outcome of the permission/setup phase.
pub trait SetupListener: Send + Sync {
    fn on_setup_success(&self);
    fn on_setup_error(&self, message: &str);
}

/// Receives session lifecycle callbacks.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionListener: Send + Sync {
    fn on_stream_received(&self, subscriber: SubscriberHandle);
    fn on_connected(&self, publisher: PublisherHandle);
    /// A remote stream went away. Carries no stream id.
    fn on_stream_dropped(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    /// A permission request finished without an answer from the user.
    PermissionPending,
    ConnectFailure,
    PublishFailure,
    SubscribeFailure,
    DisconnectFailure,
}

/// Optional sink for failures that never reach the session listener.
pub trait DiagnosticListener: Send + Sync {
    fn on_error(&self, kind: ErrorKind, detail: &str);
}

type Slot<T> = Arc<RwLock<Option<Arc<T>>>>;

/// Single-slot registration per listener kind.
///
/// Setting a listener replaces the previous one. Nothing is buffered: an
/// event fired while a slot is empty is dropped.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    setup: Slot<dyn SetupListener>,
    session: Slot<dyn SessionListener>,
    diagnostics: Slot<dyn DiagnosticListener>,
}

fn load<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn store<T: ?Sized>(slot: &Slot<T>, value: Option<Arc<T>>) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_setup_listener(&self, listener: Arc<dyn SetupListener>) {
        store(&self.setup, Some(listener));
    }

    pub fn set_session_listener(&self, listener: Arc<dyn SessionListener>) {
        store(&self.session, Some(listener));
    }

    pub fn set_diagnostic_listener(&self, listener: Arc<dyn DiagnosticListener>) {
        store(&self.diagnostics, Some(listener));
    }

    pub fn clear_setup_listener(&self) {
        store(&self.setup, None);
    }

    pub fn clear_session_listener(&self) {
        store(&self.session, None);
    }

    pub fn clear_diagnostic_listener(&self) {
        store(&self.diagnostics, None);
    }

    // The slot lock is released before each callback runs so listeners may
    // re-register or call back into the orchestrator.

    pub fn setup_success(&self) {
        match load(&self.setup) {
            Some(l) => l.on_setup_success(),
            None => tracing::debug!("setup success dropped: no setup listener"),
        }
    }

    pub fn setup_error(&self, message: &str) {
        match load(&self.setup) {
            Some(l) => l.on_setup_error(message),
            None => tracing::debug!("setup error dropped: no setup listener"),
        }
    }

    pub fn connected(&self, publisher: PublisherHandle) {
        match load(&self.session) {
            Some(l) => l.on_connected(publisher),
            None => tracing::debug!("on_connected dropped: no session listener"),
        }
    }

    pub fn stream_received(&self, subscriber: SubscriberHandle) {
        match load(&self.session) {
            Some(l) => l.on_stream_received(subscriber),
            None => tracing::debug!("on_stream_received dropped: no session listener"),
        }
    }

    pub fn stream_dropped(&self) {
        match load(&self.session) {
            Some(l) => l.on_stream_dropped(),
            None => tracing::debug!("on_stream_dropped dropped: no session listener"),
        }
    }

    pub fn error(&self, kind: ErrorKind, detail: &str) {
        if let Some(l) = load(&self.diagnostics) {
            l.on_error(kind, detail);
        }
    }
}
