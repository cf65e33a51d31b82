use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of a media endpoint owned by the transport SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Liveness flag shared between every clone of a handle and the orchestrator.
#[derive(Debug, Clone)]
struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Local media source sent into the session.
///
/// Callers attach `endpoint()` to their rendering surface and pass the
/// handle back to `SessionOrchestrator::publish`.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    endpoint: EndpointId,
    live: Liveness,
}

impl PublisherHandle {
    pub(crate) fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            live: Liveness::new(),
        }
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    pub(crate) fn invalidate(&self) {
        self.live.invalidate();
    }
}

impl PartialEq for PublisherHandle {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for PublisherHandle {}

impl Hash for PublisherHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}

/// Incoming media stream of a remote participant.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    endpoint: EndpointId,
    stream_id: String,
    live: Liveness,
}

impl SubscriberHandle {
    pub(crate) fn new(endpoint: EndpointId, stream_id: String) -> Self {
        Self {
            endpoint,
            stream_id,
            live: Liveness::new(),
        }
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// False once the remote stream was destroyed or the session ended.
    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    pub(crate) fn invalidate(&self) {
        self.live.invalidate();
    }
}

impl PartialEq for SubscriberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for SubscriberHandle {}

impl Hash for SubscriberHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}
