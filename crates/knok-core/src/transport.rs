use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::Credentials;
use crate::errors::TransportError;
use crate::handles::EndpointId;

/// Events pushed by the transport SDK for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ConnectFailed(String),
    Disconnected,
    RemoteStreamCreated(String),
    RemoteStreamDestroyed(String),
    PublishFailed(String),
    SubscribeFailed(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Capabilities required from the real-time video SDK.
///
/// `connect` only initiates the session: the returned stream later yields
/// `Connected` or `ConnectFailed`, followed by stream lifecycle events.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<TransportEvents, TransportError>;

    /// Create a publisher bound to a new local media source.
    fn create_publisher(&self) -> Result<EndpointId, TransportError>;

    /// Create a subscriber for a remote stream announced by the session.
    fn create_subscriber(&self, stream_id: &str) -> Result<EndpointId, TransportError>;

    async fn publish(&self, publisher: EndpointId) -> Result<(), TransportError>;

    async fn subscribe(&self, subscriber: EndpointId) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Ownership of a connection whose connect runs in a background task.
///
/// Each `begin` starts a new generation. `take` (used by disconnect) bumps the
/// generation and aborts the pending task, so a connect that completes late
/// gets its connection handed back by `complete` and must close it.
pub struct ConnectSlot<R> {
    inner: Mutex<SlotInner<R>>,
}

struct SlotInner<R> {
    generation: u64,
    pending: Option<AbortHandle>,
    connecting: bool,
    live: Option<R>,
}

impl<R: Clone> ConnectSlot<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                generation: 0,
                pending: None,
                connecting: false,
                live: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<R>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve the slot for a new connect attempt.
    pub fn begin(&self) -> Result<u64, TransportError> {
        let mut inner = self.lock();
        if inner.live.is_some() {
            return Err(TransportError::new("already connected"));
        }
        if inner.connecting {
            return Err(TransportError::new("connect already in progress"));
        }
        inner.generation += 1;
        inner.connecting = true;
        Ok(inner.generation)
    }

    /// Remember the task driving `generation` so disconnect can abort it.
    pub fn track(&self, generation: u64, task: AbortHandle) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.connecting {
            inner.pending = Some(task);
        } else {
            task.abort();
        }
    }

    /// Store the connection for `generation`. Hands it back if that attempt
    /// was cancelled in the meantime.
    pub fn complete(&self, generation: u64, live: R) -> Result<(), R> {
        let mut inner = self.lock();
        if inner.generation != generation || !inner.connecting {
            return Err(live);
        }
        inner.connecting = false;
        inner.pending = None;
        inner.live = Some(live);
        Ok(())
    }

    /// Release the slot after `generation` failed or ended on its own.
    pub fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.connecting = false;
            inner.pending = None;
            inner.live = None;
        }
    }

    /// Cancel any pending attempt and take the live connection, if any.
    pub fn take(&self) -> Option<R> {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.connecting = false;
        if let Some(task) = inner.pending.take() {
            task.abort();
        }
        inner.live.take()
    }

    pub fn current(&self) -> Option<R> {
        self.lock().live.clone()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }
}

impl<R: Clone> Default for ConnectSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}
