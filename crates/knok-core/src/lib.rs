//! Knok video appointment core.
//!
//! Pure Rust crate: permission acquisition, session lifecycle and listener
//! fan-out around an abstract real-time video transport.
//! Consumed by native UI shells via UniFFI bindings.

pub mod config;
pub mod errors;
pub mod handles;
pub mod listeners;
pub mod permissions;
pub mod session;
pub mod transport;

#[cfg(feature = "livekit")]
pub mod livekit_transport;

#[cfg(test)]
mod testing;

pub use config::{Credentials, SessionOptions};
pub use errors::{KnokError, TransportError};
pub use handles::{EndpointId, PublisherHandle, SubscriberHandle};
pub use listeners::{DiagnosticListener, ErrorKind, ListenerRegistry, SessionListener, SetupListener};
pub use permissions::{
    AuthorizationStatus, Capability, PermissionGate, PermissionOutcome, PermissionProvider,
    PermissionSnapshot, PermissionState, Prompter,
};
pub use session::{SessionOrchestrator, SessionState};
pub use transport::{ConnectSlot, Transport, TransportEvent, TransportEvents};

#[cfg(feature = "livekit")]
pub use livekit_transport::LiveKitTransport;
