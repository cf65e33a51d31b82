use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Hardware capability guarded by an OS permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Camera,
    Microphone,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Camera => f.write_str("camera"),
            Capability::Microphone => f.write_str("microphone"),
        }
    }
}

/// Authorization status as reported by the OS permission subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

/// What the gate currently knows about one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
    Pending,
}

impl From<AuthorizationStatus> for PermissionState {
    fn from(status: AuthorizationStatus) -> Self {
        match status {
            AuthorizationStatus::Authorized => PermissionState::Granted,
            AuthorizationStatus::Denied => PermissionState::Denied,
            AuthorizationStatus::NotDetermined => PermissionState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionSnapshot {
    pub camera: PermissionState,
    pub microphone: PermissionState,
}

/// Result of a full `request_permissions` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    /// Permanently denied; the user was sent to the OS settings.
    Denied(Capability),
    /// The OS request completed without a decision.
    Pending(Capability),
}

/// Next action for the gate given the current authorization statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    Resolved,
    PromptSettings(Capability),
    RequestAccess(Capability),
}

pub const PROMPT_TITLE: &str = "IMPORTANT";
pub const SETTINGS_PROMPT_MESSAGE: &str =
    "Access required for Video calls. Please go to settings and change your preferences";

/// OS permission subsystem.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    fn authorization_status(&self, capability: Capability) -> AuthorizationStatus;

    /// Ask the OS for access. Resolves when the system dialog is dismissed.
    async fn request_access(&self, capability: Capability);

    /// True when there is no real capture hardware (simulator, VM).
    fn is_virtualized(&self) -> bool {
        false
    }
}

/// Presents a modal prompt to the user.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Returns whether the user acknowledged the prompt.
    async fn present_blocking_prompt(&self, title: &str, message: &str) -> bool;
}

/// Acquires camera and microphone authorization before a session starts.
///
/// Camera is checked before microphone. A denied capability ends the run
/// with a settings prompt; an undetermined one triggers the OS request and
/// the evaluation restarts from the top once it completes.
#[derive(Clone)]
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    prompter: Arc<dyn Prompter>,
    bypass: bool,
    snapshot: Arc<Mutex<PermissionSnapshot>>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn PermissionProvider>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            provider,
            prompter,
            bypass: false,
            snapshot: Arc::new(Mutex::new(PermissionSnapshot::default())),
        }
    }

    /// Skip all checks regardless of what the provider reports.
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn snapshot(&self) -> PermissionSnapshot {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pure decision over the capabilities' current statuses.
    pub fn next_step(camera: AuthorizationStatus, microphone: AuthorizationStatus) -> GateStep {
        for (capability, status) in [
            (Capability::Camera, camera),
            (Capability::Microphone, microphone),
        ] {
            match status {
                AuthorizationStatus::Authorized => continue,
                AuthorizationStatus::Denied => return GateStep::PromptSettings(capability),
                AuthorizationStatus::NotDetermined => return GateStep::RequestAccess(capability),
            }
        }
        GateStep::Resolved
    }

    pub async fn request_permissions(&self) -> PermissionOutcome {
        if self.bypass || self.provider.is_virtualized() {
            tracing::info!("permission checks bypassed");
            self.record(PermissionState::Granted, PermissionState::Granted);
            return PermissionOutcome::Granted;
        }

        let mut last_requested: Option<Capability> = None;
        loop {
            let camera = self.provider.authorization_status(Capability::Camera);
            // Microphone is only consulted once the camera is authorized.
            let microphone = if camera == AuthorizationStatus::Authorized {
                self.provider.authorization_status(Capability::Microphone)
            } else {
                AuthorizationStatus::NotDetermined
            };
            self.record(
                camera.into(),
                if camera == AuthorizationStatus::Authorized {
                    microphone.into()
                } else {
                    PermissionState::Unknown
                },
            );

            match Self::next_step(camera, microphone) {
                GateStep::Resolved => {
                    tracing::info!("camera and microphone authorized");
                    return PermissionOutcome::Granted;
                }
                GateStep::PromptSettings(capability) => {
                    tracing::warn!("{capability} access denied, prompting for settings");
                    let acknowledged = self
                        .prompter
                        .present_blocking_prompt(PROMPT_TITLE, SETTINGS_PROMPT_MESSAGE)
                        .await;
                    tracing::debug!("settings prompt acknowledged: {acknowledged}");
                    return PermissionOutcome::Denied(capability);
                }
                GateStep::RequestAccess(capability) => {
                    if last_requested == Some(capability) {
                        tracing::info!("{capability} access still undetermined after request");
                        return PermissionOutcome::Pending(capability);
                    }
                    tracing::info!("requesting {capability} access");
                    self.provider.request_access(capability).await;
                    last_requested = Some(capability);
                }
            }
        }
    }

    fn record(&self, camera: PermissionState, microphone: PermissionState) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        snapshot.camera = camera;
        snapshot.microphone = microphone;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPermissions, MockPrompter};
    use AuthorizationStatus::*;

    fn gate(permissions: &Arc<MockPermissions>, prompter: &Arc<MockPrompter>) -> PermissionGate {
        PermissionGate::new(permissions.clone(), prompter.clone())
    }

    #[test]
    fn next_step_checks_camera_first() {
        assert_eq!(
            PermissionGate::next_step(Denied, NotDetermined),
            GateStep::PromptSettings(Capability::Camera)
        );
        assert_eq!(
            PermissionGate::next_step(NotDetermined, Denied),
            GateStep::RequestAccess(Capability::Camera)
        );
        assert_eq!(
            PermissionGate::next_step(Authorized, Denied),
            GateStep::PromptSettings(Capability::Microphone)
        );
        assert_eq!(
            PermissionGate::next_step(Authorized, NotDetermined),
            GateStep::RequestAccess(Capability::Microphone)
        );
        assert_eq!(PermissionGate::next_step(Authorized, Authorized), GateStep::Resolved);
    }

    #[tokio::test]
    async fn both_authorized_resolves_granted() {
        let permissions = Arc::new(MockPermissions::new(Authorized, Authorized));
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter);

        assert_eq!(gate.request_permissions().await, PermissionOutcome::Granted);
        assert_eq!(prompter.prompt_count(), 0);
        assert!(permissions.requests().is_empty());
        assert_eq!(
            gate.snapshot(),
            PermissionSnapshot {
                camera: PermissionState::Granted,
                microphone: PermissionState::Granted,
            }
        );
    }

    #[tokio::test]
    async fn camera_denied_prompts_without_request() {
        let permissions = Arc::new(MockPermissions::new(Denied, Authorized));
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter);

        assert_eq!(
            gate.request_permissions().await,
            PermissionOutcome::Denied(Capability::Camera)
        );
        assert_eq!(prompter.prompt_count(), 1);
        assert_eq!(prompter.last_message().as_deref(), Some(SETTINGS_PROMPT_MESSAGE));
        assert!(permissions.requests().is_empty());
        assert_eq!(gate.snapshot().camera, PermissionState::Denied);
    }

    #[tokio::test]
    async fn camera_undetermined_requests_then_restarts() {
        let permissions = Arc::new(MockPermissions::new(NotDetermined, Authorized));
        permissions.grant_on_request(Capability::Camera, Authorized);
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter);

        assert_eq!(gate.request_permissions().await, PermissionOutcome::Granted);
        assert_eq!(permissions.requests(), vec![Capability::Camera]);
        assert_eq!(prompter.prompt_count(), 0);
    }

    #[tokio::test]
    async fn request_then_denied_prompts_once() {
        let permissions = Arc::new(MockPermissions::new(NotDetermined, Authorized));
        permissions.grant_on_request(Capability::Camera, Denied);
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter);

        assert_eq!(
            gate.request_permissions().await,
            PermissionOutcome::Denied(Capability::Camera)
        );
        assert_eq!(permissions.requests(), vec![Capability::Camera]);
        assert_eq!(prompter.prompt_count(), 1);
    }

    #[tokio::test]
    async fn microphone_walks_the_same_branches() {
        let permissions = Arc::new(MockPermissions::new(Authorized, NotDetermined));
        permissions.grant_on_request(Capability::Microphone, Authorized);
        let prompter = Arc::new(MockPrompter::default());
        assert_eq!(
            gate(&permissions, &prompter).request_permissions().await,
            PermissionOutcome::Granted
        );
        assert_eq!(permissions.requests(), vec![Capability::Microphone]);

        let permissions = Arc::new(MockPermissions::new(Authorized, Denied));
        let prompter = Arc::new(MockPrompter::default());
        assert_eq!(
            gate(&permissions, &prompter).request_permissions().await,
            PermissionOutcome::Denied(Capability::Microphone)
        );
        assert_eq!(prompter.prompt_count(), 1);
    }

    #[tokio::test]
    async fn unanswered_request_is_pending() {
        let permissions = Arc::new(MockPermissions::new(NotDetermined, Authorized));
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter);

        assert_eq!(
            gate.request_permissions().await,
            PermissionOutcome::Pending(Capability::Camera)
        );
        assert_eq!(permissions.requests(), vec![Capability::Camera]);
        assert_eq!(prompter.prompt_count(), 0);
        assert_eq!(gate.snapshot().camera, PermissionState::Pending);
    }

    #[tokio::test]
    async fn virtualized_hardware_bypasses_checks() {
        let permissions = Arc::new(MockPermissions::new(Denied, Denied));
        permissions.set_virtualized(true);
        let prompter = Arc::new(MockPrompter::default());

        assert_eq!(
            gate(&permissions, &prompter).request_permissions().await,
            PermissionOutcome::Granted
        );
        assert_eq!(prompter.prompt_count(), 0);
        assert_eq!(permissions.status_queries(), 0);
    }

    #[tokio::test]
    async fn explicit_bypass_skips_provider() {
        let permissions = Arc::new(MockPermissions::new(Denied, Denied));
        let prompter = Arc::new(MockPrompter::default());
        let gate = gate(&permissions, &prompter).with_bypass(true);

        assert_eq!(gate.request_permissions().await, PermissionOutcome::Granted);
        assert_eq!(permissions.status_queries(), 0);
    }
}
