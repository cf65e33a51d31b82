//! Mock collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Credentials;
use crate::errors::TransportError;
use crate::handles::{EndpointId, PublisherHandle, SubscriberHandle};
use crate::listeners::{DiagnosticListener, ErrorKind, SessionListener, SetupListener};
use crate::permissions::{AuthorizationStatus, Capability, PermissionProvider, Prompter};
use crate::transport::{Transport, TransportEvent, TransportEvents};

pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

pub struct MockPermissions {
    statuses: Mutex<HashMap<Capability, AuthorizationStatus>>,
    on_request: Mutex<HashMap<Capability, AuthorizationStatus>>,
    requests: Mutex<Vec<Capability>>,
    queries: AtomicUsize,
    virtualized: AtomicBool,
}

impl MockPermissions {
    pub fn new(camera: AuthorizationStatus, microphone: AuthorizationStatus) -> Self {
        Self {
            statuses: Mutex::new(HashMap::from([
                (Capability::Camera, camera),
                (Capability::Microphone, microphone),
            ])),
            on_request: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            virtualized: AtomicBool::new(false),
        }
    }

    /// Status the capability switches to once its request completes.
    pub fn grant_on_request(&self, capability: Capability, status: AuthorizationStatus) {
        self.on_request.lock().unwrap().insert(capability, status);
    }

    pub fn set_virtualized(&self, virtualized: bool) {
        self.virtualized.store(virtualized, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Capability> {
        self.requests.lock().unwrap().clone()
    }

    pub fn status_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProvider for MockPermissions {
    fn authorization_status(&self, capability: Capability) -> AuthorizationStatus {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.statuses.lock().unwrap()[&capability]
    }

    async fn request_access(&self, capability: Capability) {
        self.requests.lock().unwrap().push(capability);
        let next = self.on_request.lock().unwrap().get(&capability).copied();
        if let Some(status) = next {
            self.statuses.lock().unwrap().insert(capability, status);
        }
    }

    fn is_virtualized(&self) -> bool {
        self.virtualized.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockPrompter {
    prompts: Mutex<Vec<(String, String)>>,
}

impl MockPrompter {
    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_message(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl Prompter for MockPrompter {
    async fn present_blocking_prompt(&self, title: &str, message: &str) -> bool {
        self.prompts
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        true
    }
}

#[derive(Default)]
pub struct MockTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    credentials: Mutex<Option<Credentials>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    next_endpoint: AtomicU64,
    published: Mutex<Vec<EndpointId>>,
    subscribed: Mutex<Vec<EndpointId>>,
    created_subscribers: Mutex<Vec<String>>,
    connect_error: Mutex<Option<String>>,
    publish_error: Mutex<Option<String>>,
    subscribe_error: Mutex<Option<String>>,
    disconnect_error: Mutex<Option<String>>,
}

impl MockTransport {
    /// Push an event on the stream of the latest connection.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<EndpointId> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> Vec<EndpointId> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn created_subscribers(&self) -> Vec<String> {
        self.created_subscribers.lock().unwrap().clone()
    }

    pub fn fail_connect(&self, msg: &str) {
        *self.connect_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_publish(&self, msg: &str) {
        *self.publish_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_subscribe(&self, msg: &str) {
        *self.subscribe_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_disconnect(&self, msg: &str) {
        *self.disconnect_error.lock().unwrap() = Some(msg.to_string());
    }

    fn check(slot: &Mutex<Option<String>>) -> Result<(), TransportError> {
        match slot.lock().unwrap().as_ref() {
            Some(msg) => Err(TransportError::new(msg.clone())),
            None => Ok(()),
        }
    }

    fn allocate(&self) -> EndpointId {
        EndpointId(self.next_endpoint.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<TransportEvents, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.credentials.lock().unwrap() = Some(credentials.clone());
        Self::check(&self.connect_error)?;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn create_publisher(&self) -> Result<EndpointId, TransportError> {
        Ok(self.allocate())
    }

    fn create_subscriber(&self, stream_id: &str) -> Result<EndpointId, TransportError> {
        self.created_subscribers
            .lock()
            .unwrap()
            .push(stream_id.to_string());
        Ok(self.allocate())
    }

    async fn publish(&self, publisher: EndpointId) -> Result<(), TransportError> {
        Self::check(&self.publish_error)?;
        self.published.lock().unwrap().push(publisher);
        Ok(())
    }

    async fn subscribe(&self, subscriber: EndpointId) -> Result<(), TransportError> {
        Self::check(&self.subscribe_error)?;
        self.subscribed.lock().unwrap().push(subscriber);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Self::check(&self.disconnect_error)?;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingSessionListener {
    pub connected: AtomicUsize,
    pub received: AtomicUsize,
    pub dropped: AtomicUsize,
    pub publishers: Mutex<Vec<PublisherHandle>>,
    pub subscribers: Mutex<Vec<SubscriberHandle>>,
}

impl SessionListener for CountingSessionListener {
    fn on_stream_received(&self, subscriber: SubscriberHandle) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(subscriber);
    }

    fn on_connected(&self, publisher: PublisherHandle) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.publishers.lock().unwrap().push(publisher);
    }

    fn on_stream_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingSetupListener {
    pub successes: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
}

impl SetupListener for CountingSetupListener {
    fn on_setup_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_setup_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub struct CaptureDiagnostics {
    captured: Mutex<Vec<(ErrorKind, String)>>,
}

impl CaptureDiagnostics {
    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.captured.lock().unwrap().clone()
    }
}

impl DiagnosticListener for CaptureDiagnostics {
    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.captured.lock().unwrap().push((kind, detail.to_string()));
    }
}
