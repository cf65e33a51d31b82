use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::config::{Credentials, SessionOptions};
use crate::errors::KnokError;
use crate::handles::{PublisherHandle, SubscriberHandle};
use crate::listeners::{
    DiagnosticListener, ErrorKind, ListenerRegistry, SessionListener, SetupListener,
};
use crate::permissions::{
    PermissionGate, PermissionOutcome, PermissionProvider, PermissionSnapshot, Prompter,
};
use crate::transport::{Transport, TransportEvent, TransportEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// One pending or live transport session.
struct SessionConnection {
    id: Uuid,
    publisher: Option<PublisherHandle>,
    publishing: bool,
    subscribers: HashMap<String, SubscriberHandle>,
}

impl SessionConnection {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            publisher: None,
            publishing: false,
            subscribers: HashMap::new(),
        }
    }

    fn invalidate_all(self) {
        if let Some(publisher) = self.publisher {
            publisher.invalidate();
        }
        for (_, subscriber) in self.subscribers {
            subscriber.invalidate();
        }
    }
}

struct SessionInner {
    state: SessionState,
    credentials: Option<Credentials>,
    connection: Option<SessionConnection>,
}

impl SessionInner {
    fn current_mut(&mut self, id: Uuid) -> Option<&mut SessionConnection> {
        self.connection.as_mut().filter(|c| c.id == id)
    }

    fn is_current(&self, id: Uuid) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id == id)
    }

    fn require_connected(&self) -> Result<&SessionConnection, KnokError> {
        match (self.state, self.connection.as_ref()) {
            (SessionState::Connected, Some(connection)) => Ok(connection),
            (actual, _) => Err(KnokError::InvalidState {
                expected: "connected",
                actual,
            }),
        }
    }

    /// Drop the live connection, invalidating every handle it issued.
    fn teardown(&mut self, state: SessionState) {
        if let Some(connection) = self.connection.take() {
            connection.invalidate_all();
        }
        self.state = state;
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    gate: PermissionGate,
    listeners: ListenerRegistry,
    options: SessionOptions,
    inner: Mutex<SessionInner>,
}

/// Orchestrates a single video appointment.
///
/// `start_video_appointment` runs the permission gate and then connects the
/// transport. Transport events are applied by one event-loop task per
/// connection and projected to the registered listeners. The state lock is
/// never held across an `.await` or a listener callback.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

impl SessionOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        permissions: Arc<dyn PermissionProvider>,
        prompter: Arc<dyn Prompter>,
        options: SessionOptions,
    ) -> Self {
        let gate = PermissionGate::new(permissions, prompter).with_bypass(options.bypass_permissions);
        Self {
            shared: Arc::new(Shared {
                transport,
                gate,
                listeners: ListenerRegistry::new(),
                options,
                inner: Mutex::new(SessionInner {
                    state: SessionState::Idle,
                    credentials: None,
                    connection: None,
                }),
            }),
        }
    }

    /// Store the session credentials. Allowed once per orchestrator.
    pub fn configure(&self, credentials: Credentials) -> Result<(), KnokError> {
        let mut inner = self.shared.lock();
        if inner.credentials.is_some() {
            return Err(KnokError::AlreadyConfigured);
        }
        tracing::debug!("configured for session {}", credentials.session_id);
        inner.credentials = Some(credentials);
        Ok(())
    }

    pub fn set_setup_listener(&self, listener: Arc<dyn SetupListener>) {
        self.shared.listeners.set_setup_listener(listener);
    }

    pub fn set_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.shared.listeners.set_session_listener(listener);
    }

    pub fn set_diagnostic_listener(&self, listener: Arc<dyn DiagnosticListener>) {
        self.shared.listeners.set_diagnostic_listener(listener);
    }

    pub fn clear_setup_listener(&self) {
        self.shared.listeners.clear_setup_listener();
    }

    pub fn clear_session_listener(&self) {
        self.shared.listeners.clear_session_listener();
    }

    pub fn clear_diagnostic_listener(&self) {
        self.shared.listeners.clear_diagnostic_listener();
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.shared.lock().credentials.clone()
    }

    pub fn permission_snapshot(&self) -> PermissionSnapshot {
        self.shared.gate.snapshot()
    }

    /// Id of the live transport connection, if any.
    pub fn connection_id(&self) -> Option<Uuid> {
        self.shared.lock().connection.as_ref().map(|c| c.id)
    }

    pub fn publisher(&self) -> Option<PublisherHandle> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .and_then(|c| c.publisher.clone())
    }

    pub fn has_active_publisher(&self) -> bool {
        self.shared
            .lock()
            .connection
            .as_ref()
            .is_some_and(|c| c.publishing)
    }

    pub fn active_subscriber(&self, stream_id: &str) -> Option<SubscriberHandle> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .and_then(|c| c.subscribers.get(stream_id).cloned())
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .lock()
            .connection
            .as_ref()
            .map_or(0, |c| c.subscribers.len())
    }

    /// Acquire permissions, then connect the transport.
    ///
    /// Fails without side effects unless the orchestrator is idle (or its
    /// previous session has ended). Permission failures are reported to the
    /// setup listener and never reach the transport.
    pub async fn start_video_appointment(&self) -> Result<(), KnokError> {
        let credentials = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Idle | SessionState::Disconnected => {}
                actual => {
                    tracing::warn!("start_video_appointment ignored in state {actual:?}");
                    return Err(KnokError::InvalidState {
                        expected: "idle",
                        actual,
                    });
                }
            }
            let credentials = inner.credentials.clone().ok_or(KnokError::NotConfigured)?;
            inner.state = SessionState::Connecting;
            credentials
        };

        let denied = match self.shared.gate.request_permissions().await {
            PermissionOutcome::Granted => None,
            PermissionOutcome::Denied(capability) => Some(KnokError::PermissionDenied(capability)),
            PermissionOutcome::Pending(capability) => {
                Some(KnokError::PermissionPending(capability))
            }
        };
        if let Some(err) = denied {
            self.shared.lock().state = SessionState::Idle;
            let message = err.to_string();
            tracing::warn!("setup failed: {message}");
            self.shared.listeners.setup_error(&message);
            let kind = match err {
                KnokError::PermissionPending(_) => ErrorKind::PermissionPending,
                _ => ErrorKind::PermissionDenied,
            };
            self.shared.listeners.error(kind, &message);
            return Err(err);
        }
        self.shared.listeners.setup_success();

        let events = match self.shared.transport.connect(&credentials).await {
            Ok(events) => events,
            Err(e) => {
                self.shared.lock().state = SessionState::Idle;
                tracing::warn!("connect to session {} failed: {e}", credentials.session_id);
                self.shared.listeners.error(ErrorKind::ConnectFailure, &e.0);
                return Err(KnokError::Connection(e.0));
            }
        };

        let id = Uuid::new_v4();
        self.shared.lock().connection = Some(SessionConnection::new(id));
        tracing::info!(connection = %id, "connecting to session {}", credentials.session_id);

        tokio::spawn(self.shared.clone().event_loop(id, events));
        if let Some(timeout) = self.shared.options.connect_timeout {
            tokio::spawn(self.shared.clone().connect_deadline(id, timeout));
        }
        Ok(())
    }

    /// Send the local media into the session.
    ///
    /// Transport failures go to the diagnostic listener and are returned;
    /// the session listener is not notified.
    pub async fn publish(&self, publisher: &PublisherHandle) -> Result<(), KnokError> {
        {
            let inner = self.shared.lock();
            let connection = inner.require_connected()?;
            if !publisher.is_live() || connection.publisher.as_ref() != Some(publisher) {
                return Err(KnokError::StaleHandle(publisher.endpoint().to_string()));
            }
        }

        match self.shared.transport.publish(publisher.endpoint()).await {
            Ok(()) => {
                let mut inner = self.shared.lock();
                if let Some(connection) = inner.connection.as_mut() {
                    if connection.publisher.as_ref() == Some(publisher) {
                        connection.publishing = true;
                    }
                }
                tracing::info!("publishing {}", publisher.endpoint());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("publish {} failed: {e}", publisher.endpoint());
                self.shared.listeners.error(ErrorKind::PublishFailure, &e.0);
                Err(KnokError::Publish(e.0))
            }
        }
    }

    /// Start receiving a remote stream announced via `on_stream_received`.
    pub async fn subscribe(&self, subscriber: &SubscriberHandle) -> Result<(), KnokError> {
        {
            let inner = self.shared.lock();
            let connection = inner.require_connected()?;
            let registered = connection.subscribers.get(subscriber.stream_id());
            if !subscriber.is_live() || registered != Some(subscriber) {
                return Err(KnokError::StaleHandle(subscriber.stream_id().to_string()));
            }
        }

        match self.shared.transport.subscribe(subscriber.endpoint()).await {
            Ok(()) => {
                tracing::info!("subscribed to stream {}", subscriber.stream_id());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("subscribe to stream {} failed: {e}", subscriber.stream_id());
                self.shared.listeners.error(ErrorKind::SubscribeFailure, &e.0);
                Err(KnokError::Subscribe(e.0))
            }
        }
    }

    /// Leave the session. No listener callback is issued.
    pub async fn disconnect(&self) -> Result<(), KnokError> {
        let id = self.shared.lock().require_connected()?.id;

        match self.shared.transport.disconnect().await {
            Ok(()) => {
                let mut inner = self.shared.lock();
                if inner.is_current(id) {
                    inner.teardown(SessionState::Disconnected);
                }
                tracing::info!(connection = %id, "session disconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(connection = %id, "disconnect failed: {e}");
                self.shared.listeners.error(ErrorKind::DisconnectFailure, &e.0);
                Err(KnokError::Disconnect(e.0))
            }
        }
    }

    /// Apply a transport event to the live connection.
    ///
    /// For hosts whose SDK delivers callbacks outside the event stream
    /// returned by `Transport::connect`.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        let id = self.connection_id();
        match id {
            Some(id) => {
                self.shared.dispatch(id, event);
            }
            None => tracing::debug!("no live connection, dropping {event:?}"),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn event_loop(self: Arc<Self>, id: Uuid, mut events: TransportEvents) {
        while let Some(event) = events.recv().await {
            if !self.dispatch(id, event) {
                break;
            }
        }
        tracing::debug!(connection = %id, "transport event loop ended");
    }

    async fn connect_deadline(self: Arc<Self>, id: Uuid, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let expired = {
            let mut inner = self.lock();
            if inner.is_current(id) && inner.state == SessionState::Connecting {
                inner.teardown(SessionState::Idle);
                true
            } else {
                false
            }
        };
        if expired {
            tracing::warn!(connection = %id, "connect timed out after {timeout:?}");
            if let Err(e) = self.transport.disconnect().await {
                tracing::debug!("disconnect after timeout failed: {e}");
            }
            self.listeners
                .error(ErrorKind::ConnectFailure, &format!("connect timed out after {timeout:?}"));
        }
    }

    /// Returns false once the connection `id` is gone and its events should
    /// no longer be processed.
    ///
    /// Every arm checks `id` under the same guard that applies the event, so a
    /// connection swapped in concurrently is never touched by a stale event.
    fn dispatch(&self, id: Uuid, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected => self.on_connected(id),
            TransportEvent::ConnectFailed(reason) => {
                {
                    let mut inner = self.lock();
                    if !inner.is_current(id) {
                        return stale(id, "connect failure");
                    }
                    if inner.state != SessionState::Connecting {
                        tracing::debug!("connect failure reported in state {:?}", inner.state);
                        return true;
                    }
                    inner.teardown(SessionState::Idle);
                }
                tracing::warn!(connection = %id, "session failed to connect: {reason}");
                self.listeners.error(ErrorKind::ConnectFailure, &reason);
                false
            }
            TransportEvent::Disconnected => {
                {
                    let mut inner = self.lock();
                    if !inner.is_current(id) {
                        return stale(id, "disconnect");
                    }
                    inner.teardown(SessionState::Disconnected);
                }
                tracing::info!(connection = %id, "session disconnected by transport");
                false
            }
            TransportEvent::RemoteStreamCreated(stream_id) => self.on_stream_created(id, stream_id),
            TransportEvent::RemoteStreamDestroyed(stream_id) => {
                {
                    let mut inner = self.lock();
                    let Some(connection) = inner.current_mut(id) else {
                        return stale(id, "stream destroyed");
                    };
                    match connection.subscribers.remove(&stream_id) {
                        Some(subscriber) => subscriber.invalidate(),
                        None => tracing::debug!("destroyed stream {stream_id} was never received"),
                    }
                }
                tracing::info!(connection = %id, "stream destroyed: {stream_id}");
                self.listeners.stream_dropped();
                true
            }
            TransportEvent::PublishFailed(reason) => {
                match self.lock().current_mut(id) {
                    Some(connection) => connection.publishing = false,
                    None => return stale(id, "publish failure"),
                }
                tracing::warn!(connection = %id, "publisher failed: {reason}");
                self.listeners.error(ErrorKind::PublishFailure, &reason);
                true
            }
            TransportEvent::SubscribeFailed(reason) => {
                if !self.lock().is_current(id) {
                    return stale(id, "subscribe failure");
                }
                tracing::warn!(connection = %id, "subscriber failed: {reason}");
                self.listeners.error(ErrorKind::SubscribeFailure, &reason);
                true
            }
        }
    }

    fn on_connected(&self, id: Uuid) -> bool {
        {
            let mut inner = self.lock();
            if !inner.is_current(id) {
                return stale(id, "connected");
            }
            if inner.state != SessionState::Connecting {
                tracing::debug!("duplicate connected event in state {:?}", inner.state);
                return true;
            }
            inner.state = SessionState::Connected;
        }
        tracing::info!(connection = %id, "session connected");

        let publisher = match self.transport.create_publisher() {
            Ok(endpoint) => PublisherHandle::new(endpoint),
            Err(e) => {
                tracing::warn!(connection = %id, "failed to create publisher: {e}");
                self.listeners.error(ErrorKind::PublishFailure, &e.0);
                return true;
            }
        };

        {
            let mut inner = self.lock();
            match inner.current_mut(id) {
                Some(connection) => connection.publisher = Some(publisher.clone()),
                None => {
                    publisher.invalidate();
                    return false;
                }
            }
        }
        self.listeners.connected(publisher);
        true
    }

    fn on_stream_created(&self, id: Uuid, stream_id: String) -> bool {
        {
            let mut inner = self.lock();
            if !inner.is_current(id) {
                return stale(id, "stream created");
            }
            if inner.state != SessionState::Connected {
                tracing::debug!("stream {stream_id} announced in state {:?}", inner.state);
                return true;
            }
            let previous = inner
                .current_mut(id)
                .and_then(|c| c.subscribers.remove(&stream_id));
            if let Some(previous) = previous {
                tracing::debug!("replacing subscriber for stream {stream_id}");
                previous.invalidate();
            }
        }
        tracing::info!(connection = %id, "stream created: {stream_id}");

        let subscriber = match self.transport.create_subscriber(&stream_id) {
            Ok(endpoint) => SubscriberHandle::new(endpoint, stream_id.clone()),
            Err(e) => {
                tracing::warn!("failed to create subscriber for {stream_id}: {e}");
                self.listeners.error(ErrorKind::SubscribeFailure, &e.0);
                return true;
            }
        };

        {
            let mut inner = self.lock();
            match inner.current_mut(id) {
                Some(connection) => {
                    connection.subscribers.insert(stream_id, subscriber.clone());
                }
                None => {
                    subscriber.invalidate();
                    return false;
                }
            }
        }
        self.listeners.stream_received(subscriber);
        true
    }
}

fn stale(id: Uuid, what: &str) -> bool {
    tracing::debug!(connection = %id, "ignoring {what} for stale connection");
    false
}
