//! UniFFI bindings for knok-core.
//!
//! Provides a KnokClient object that wraps the SessionOrchestrator into a
//! single FFI-safe interface. The host shell implements the OS permission
//! subsystem, the blocking prompt and the bridge to its native video SDK as
//! callback interfaces, and pushes SDK delegate callbacks back in through
//! `push_transport_event`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use knok_core::{
    self, AuthorizationStatus as CoreAuthorizationStatus, Capability as CoreCapability,
    Credentials as CoreCredentials, EndpointId, ErrorKind as CoreErrorKind,
    SessionState as CoreSessionState, TransportError, TransportEvent as CoreTransportEvent,
    TransportEvents,
};
use tokio::sync::mpsc;

uniffi::include_scaffolding!("knok");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using KnokClient.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("knok_core=debug,knok_ffi=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

/// Host-tunable session behavior. A missing timeout means no connect deadline.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub connect_timeout_ms: Option<u64>,
    pub bypass_permissions: bool,
}

impl From<SessionOptions> for knok_core::SessionOptions {
    fn from(o: SessionOptions) -> Self {
        Self {
            connect_timeout: o.connect_timeout_ms.map(Duration::from_millis),
            bypass_permissions: o.bypass_permissions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub session_id: String,
    pub session_token: String,
}

impl From<Credentials> for CoreCredentials {
    fn from(c: Credentials) -> Self {
        CoreCredentials::new(c.api_key, c.session_id, c.session_token)
    }
}

impl From<CoreCredentials> for Credentials {
    fn from(c: CoreCredentials) -> Self {
        Self {
            api_key: c.api_key,
            session_id: c.session_id,
            session_token: c.session_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl From<CoreSessionState> for SessionState {
    fn from(s: CoreSessionState) -> Self {
        match s {
            CoreSessionState::Idle => Self::Idle,
            CoreSessionState::Connecting => Self::Connecting,
            CoreSessionState::Connected => Self::Connected,
            CoreSessionState::Disconnected => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Camera,
    Microphone,
}

impl From<CoreCapability> for Capability {
    fn from(c: CoreCapability) -> Self {
        match c {
            CoreCapability::Camera => Self::Camera,
            CoreCapability::Microphone => Self::Microphone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

impl From<AuthorizationStatus> for CoreAuthorizationStatus {
    fn from(s: AuthorizationStatus) -> Self {
        match s {
            AuthorizationStatus::Authorized => Self::Authorized,
            AuthorizationStatus::Denied => Self::Denied,
            AuthorizationStatus::NotDetermined => Self::NotDetermined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    PermissionPending,
    ConnectFailure,
    PublishFailure,
    SubscribeFailure,
    DisconnectFailure,
}

impl From<CoreErrorKind> for ErrorKind {
    fn from(k: CoreErrorKind) -> Self {
        match k {
            CoreErrorKind::PermissionDenied => Self::PermissionDenied,
            CoreErrorKind::PermissionPending => Self::PermissionPending,
            CoreErrorKind::ConnectFailure => Self::ConnectFailure,
            CoreErrorKind::PublishFailure => Self::PublishFailure,
            CoreErrorKind::SubscribeFailure => Self::SubscribeFailure,
            CoreErrorKind::DisconnectFailure => Self::DisconnectFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ConnectFailed { reason: String },
    Disconnected,
    RemoteStreamCreated { stream_id: String },
    RemoteStreamDestroyed { stream_id: String },
    PublishFailed { reason: String },
    SubscribeFailed { reason: String },
}

impl From<TransportEvent> for CoreTransportEvent {
    fn from(e: TransportEvent) -> Self {
        match e {
            TransportEvent::Connected => Self::Connected,
            TransportEvent::ConnectFailed { reason } => Self::ConnectFailed(reason),
            TransportEvent::Disconnected => Self::Disconnected,
            TransportEvent::RemoteStreamCreated { stream_id } => Self::RemoteStreamCreated(stream_id),
            TransportEvent::RemoteStreamDestroyed { stream_id } => {
                Self::RemoteStreamDestroyed(stream_id)
            }
            TransportEvent::PublishFailed { reason } => Self::PublishFailed(reason),
            TransportEvent::SubscribeFailed { reason } => Self::SubscribeFailed(reason),
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum KnokError {
    #[error("Config error: {msg}")]
    Config { msg: String },
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Permission error: {msg}")]
    Permission { msg: String },
    #[error("Connection error: {msg}")]
    Connection { msg: String },
    #[error("Transport error: {msg}")]
    Transport { msg: String },
    #[error("Stale handle: {msg}")]
    StaleHandle { msg: String },
}

impl From<knok_core::KnokError> for KnokError {
    fn from(e: knok_core::KnokError) -> Self {
        tracing::error!("KnokError: {e}");
        let msg = e.to_string();
        match e {
            knok_core::KnokError::NotConfigured
            | knok_core::KnokError::AlreadyConfigured
            | knok_core::KnokError::Config(_) => Self::Config { msg },
            knok_core::KnokError::InvalidState { .. } => Self::InvalidState { msg },
            knok_core::KnokError::PermissionDenied(_)
            | knok_core::KnokError::PermissionPending(_) => Self::Permission { msg },
            knok_core::KnokError::Connection(_) => Self::Connection { msg },
            knok_core::KnokError::Publish(_)
            | knok_core::KnokError::Subscribe(_)
            | knok_core::KnokError::Disconnect(_) => Self::Transport { msg },
            knok_core::KnokError::StaleHandle(_) => Self::StaleHandle { msg },
        }
    }
}

/// Failure thrown by a host callback.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{message}")]
    Failed { message: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for HostError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Failed { message: e.reason }
    }
}

impl From<HostError> for TransportError {
    fn from(e: HostError) -> Self {
        TransportError::new(e.to_string())
    }
}

// ── Stream handles ────────────────────────────────────────────────────

pub struct PublisherHandle {
    inner: knok_core::PublisherHandle,
}

impl PublisherHandle {
    pub fn endpoint_id(&self) -> u64 {
        self.inner.endpoint().0
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }
}

pub struct SubscriberHandle {
    inner: knok_core::SubscriberHandle,
}

impl SubscriberHandle {
    pub fn endpoint_id(&self) -> u64 {
        self.inner.endpoint().0
    }

    pub fn stream_id(&self) -> String {
        self.inner.stream_id().to_string()
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait SetupListener: Send + Sync {
    fn on_setup_success(&self);
    fn on_setup_error(&self, message: String);
}

pub trait SessionListener: Send + Sync {
    fn on_stream_received(&self, subscriber: Arc<SubscriberHandle>);
    fn on_connected(&self, publisher: Arc<PublisherHandle>);
    fn on_stream_dropped(&self);
}

pub trait DiagnosticListener: Send + Sync {
    fn on_error(&self, kind: ErrorKind, detail: String);
}

pub trait PermissionProvider: Send + Sync {
    fn authorization_status(&self, capability: Capability) -> AuthorizationStatus;
    /// May block until the system dialog is dismissed.
    fn request_access(&self, capability: Capability);
    fn is_virtualized(&self) -> bool;
}

pub trait Prompter: Send + Sync {
    fn present_blocking_prompt(&self, title: String, message: String) -> bool;
}

/// Bridge to the host's native video SDK.
///
/// `connect` starts the SDK session; its delegate callbacks are reported
/// through `KnokClient::push_transport_event`.
pub trait HostTransport: Send + Sync {
    fn connect(&self, credentials: Credentials) -> Result<(), HostError>;
    fn create_publisher(&self) -> Result<u64, HostError>;
    fn create_subscriber(&self, stream_id: String) -> Result<u64, HostError>;
    fn publish(&self, endpoint_id: u64) -> Result<(), HostError>;
    fn subscribe(&self, endpoint_id: u64) -> Result<(), HostError>;
    fn disconnect(&self) -> Result<(), HostError>;
}

// ── Bridges: FFI callbacks → core traits ─────────────────────────────

struct BridgeSetupListener {
    ffi_listener: Box<dyn SetupListener>,
}

impl knok_core::SetupListener for BridgeSetupListener {
    fn on_setup_success(&self) {
        self.ffi_listener.on_setup_success();
    }

    fn on_setup_error(&self, message: &str) {
        self.ffi_listener.on_setup_error(message.to_string());
    }
}

struct BridgeSessionListener {
    ffi_listener: Box<dyn SessionListener>,
}

impl knok_core::SessionListener for BridgeSessionListener {
    fn on_stream_received(&self, subscriber: knok_core::SubscriberHandle) {
        self.ffi_listener
            .on_stream_received(Arc::new(SubscriberHandle { inner: subscriber }));
    }

    fn on_connected(&self, publisher: knok_core::PublisherHandle) {
        self.ffi_listener
            .on_connected(Arc::new(PublisherHandle { inner: publisher }));
    }

    fn on_stream_dropped(&self) {
        self.ffi_listener.on_stream_dropped();
    }
}

struct BridgeDiagnosticListener {
    ffi_listener: Box<dyn DiagnosticListener>,
}

impl knok_core::DiagnosticListener for BridgeDiagnosticListener {
    fn on_error(&self, kind: CoreErrorKind, detail: &str) {
        self.ffi_listener.on_error(kind.into(), detail.to_string());
    }
}

// Host callbacks may block on UI, so async entry points run them on the
// blocking pool.

struct BridgePermissions {
    host: Arc<dyn PermissionProvider>,
}

#[async_trait]
impl knok_core::PermissionProvider for BridgePermissions {
    fn authorization_status(&self, capability: CoreCapability) -> CoreAuthorizationStatus {
        self.host.authorization_status(capability.into()).into()
    }

    async fn request_access(&self, capability: CoreCapability) {
        let host = self.host.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || host.request_access(capability.into())).await
        {
            tracing::error!("request_access({capability}) callback failed: {e}");
        }
    }

    fn is_virtualized(&self) -> bool {
        self.host.is_virtualized()
    }
}

struct BridgePrompter {
    host: Arc<dyn Prompter>,
}

#[async_trait]
impl knok_core::Prompter for BridgePrompter {
    async fn present_blocking_prompt(&self, title: &str, message: &str) -> bool {
        let host = self.host.clone();
        let (title, message) = (title.to_string(), message.to_string());
        tokio::task::spawn_blocking(move || host.present_blocking_prompt(title, message))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("prompt callback failed: {e}");
                false
            })
    }
}

struct BridgeTransport {
    host: Arc<dyn HostTransport>,
    events: StdMutex<Option<mpsc::UnboundedSender<CoreTransportEvent>>>,
}

impl BridgeTransport {
    fn set_sender(&self, sender: Option<mpsc::UnboundedSender<CoreTransportEvent>>) {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = sender;
    }

    /// Feed a host SDK callback into the live connection's event stream.
    fn forward(&self, event: CoreTransportEvent) {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        match events.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    tracing::debug!("event stream closed, dropping {:?}", e.0);
                }
            }
            None => tracing::debug!("no open connection, dropping {event:?}"),
        }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        F: FnOnce(&dyn HostTransport) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || f(host.as_ref()))
            .await
            .map_err(|e| TransportError::new(e.to_string()))?
            .map_err(TransportError::from)
    }
}

#[async_trait]
impl knok_core::Transport for BridgeTransport {
    async fn connect(&self, credentials: &CoreCredentials) -> Result<TransportEvents, TransportError> {
        // The sender is installed first: hosts may report `Connected` before
        // their connect call returns.
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_sender(Some(tx));
        let credentials = Credentials::from(credentials.clone());
        match self.call(move |host| host.connect(credentials)).await {
            Ok(()) => Ok(rx),
            Err(e) => {
                self.set_sender(None);
                Err(e)
            }
        }
    }

    fn create_publisher(&self) -> Result<EndpointId, TransportError> {
        Ok(EndpointId(self.host.create_publisher()?))
    }

    fn create_subscriber(&self, stream_id: &str) -> Result<EndpointId, TransportError> {
        Ok(EndpointId(self.host.create_subscriber(stream_id.to_string())?))
    }

    async fn publish(&self, publisher: EndpointId) -> Result<(), TransportError> {
        self.call(move |host| host.publish(publisher.0)).await
    }

    async fn subscribe(&self, subscriber: EndpointId) -> Result<(), TransportError> {
        self.call(move |host| host.subscribe(subscriber.0)).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.call(|host| host.disconnect()).await?;
        self.set_sender(None);
        Ok(())
    }
}

// ── KnokClient: main FFI object ──────────────────────────────────────

/// Host-facing session client.
///
/// `start_video_appointment`, `publish`, `subscribe` and `disconnect` check
/// their preconditions synchronously, then run on the client's runtime and
/// report through the listeners. They never block, so they are safe to
/// call from inside a listener callback.
pub struct KnokClient {
    orchestrator: knok_core::SessionOrchestrator,
    transport: Arc<BridgeTransport>,
    rt: tokio::runtime::Runtime,
}

impl KnokClient {
    pub fn new(
        credentials: Credentials,
        permissions: Box<dyn PermissionProvider>,
        prompter: Box<dyn Prompter>,
        transport: Box<dyn HostTransport>,
        options: Option<SessionOptions>,
    ) -> Self {
        let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
        let transport = Arc::new(BridgeTransport {
            host: Arc::from(transport),
            events: StdMutex::new(None),
        });
        let orchestrator = knok_core::SessionOrchestrator::new(
            transport.clone(),
            Arc::new(BridgePermissions {
                host: Arc::from(permissions),
            }),
            Arc::new(BridgePrompter {
                host: Arc::from(prompter),
            }),
            options.unwrap_or_default().into(),
        );
        if let Err(e) = orchestrator.configure(credentials.into()) {
            tracing::warn!("configure failed: {e}");
        }
        tracing::info!("KnokClient created");

        Self {
            orchestrator,
            transport,
            rt,
        }
    }

    pub fn set_setup_listener(&self, listener: Box<dyn SetupListener>) {
        self.orchestrator
            .set_setup_listener(Arc::new(BridgeSetupListener {
                ffi_listener: listener,
            }));
    }

    pub fn set_session_listener(&self, listener: Box<dyn SessionListener>) {
        self.orchestrator
            .set_session_listener(Arc::new(BridgeSessionListener {
                ffi_listener: listener,
            }));
    }

    pub fn set_diagnostic_listener(&self, listener: Box<dyn DiagnosticListener>) {
        self.orchestrator
            .set_diagnostic_listener(Arc::new(BridgeDiagnosticListener {
                ffi_listener: listener,
            }));
    }

    pub fn start_video_appointment(&self) -> Result<(), KnokError> {
        match self.orchestrator.state() {
            CoreSessionState::Idle | CoreSessionState::Disconnected => {}
            actual => {
                return Err(knok_core::KnokError::InvalidState {
                    expected: "idle",
                    actual,
                }
                .into());
            }
        }
        let orchestrator = self.orchestrator.clone();
        self.rt.spawn(async move {
            if let Err(e) = orchestrator.start_video_appointment().await {
                tracing::warn!("start_video_appointment failed: {e}");
            }
        });
        Ok(())
    }

    pub fn publish(&self, publisher: Arc<PublisherHandle>) -> Result<(), KnokError> {
        self.require_connected()?;
        if !publisher.is_live() {
            return Err(knok_core::KnokError::StaleHandle(publisher.inner.endpoint().to_string()).into());
        }
        let orchestrator = self.orchestrator.clone();
        self.rt.spawn(async move {
            if let Err(e) = orchestrator.publish(&publisher.inner).await {
                tracing::warn!("publish failed: {e}");
            }
        });
        Ok(())
    }

    pub fn subscribe(&self, subscriber: Arc<SubscriberHandle>) -> Result<(), KnokError> {
        self.require_connected()?;
        if !subscriber.is_live() {
            return Err(knok_core::KnokError::StaleHandle(subscriber.stream_id()).into());
        }
        let orchestrator = self.orchestrator.clone();
        self.rt.spawn(async move {
            if let Err(e) = orchestrator.subscribe(&subscriber.inner).await {
                tracing::warn!("subscribe failed: {e}");
            }
        });
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), KnokError> {
        self.require_connected()?;
        let orchestrator = self.orchestrator.clone();
        self.rt.spawn(async move {
            if let Err(e) = orchestrator.disconnect().await {
                tracing::warn!("disconnect failed: {e}");
            }
        });
        Ok(())
    }

    pub fn push_transport_event(&self, event: TransportEvent) {
        self.transport.forward(event.into());
    }

    pub fn state(&self) -> SessionState {
        self.orchestrator.state().into()
    }

    fn require_connected(&self) -> Result<(), KnokError> {
        match self.orchestrator.state() {
            CoreSessionState::Connected => Ok(()),
            actual => Err(knok_core::KnokError::InvalidState {
                expected: "connected",
                actual,
            }
            .into()),
        }
    }
}
