use thiserror::Error;

use crate::permissions::Capability;
use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum KnokError {
    #[error("credentials not configured")]
    NotConfigured,
    #[error("credentials already configured")]
    AlreadyConfigured,
    #[error("invalid state: expected {expected}, got {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },
    #[error("{0} access denied")]
    PermissionDenied(Capability),
    #[error("{0} access still pending")]
    PermissionPending(Capability),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    #[error("stale stream handle: {0}")]
    StaleHandle(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Failure reported by a transport SDK call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
