use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::KnokError;

/// Session credentials issued by the video platform.
///
/// Opaque to this crate: never validated locally, only handed to the
/// transport on connect.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub session_id: String,
    pub session_token: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        session_id: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            session_id: session_id.into(),
            session_token: session_token.into(),
        }
    }

    /// Load credentials from a JSON file with `api_key`, `session_id` and
    /// `session_token` fields.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, KnokError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KnokError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| KnokError::Config(format!("{}: {e}", path.display())))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("session_id", &self.session_id)
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Tunables for a `SessionOrchestrator`.
///
/// The defaults reproduce the platform SDK behavior: connect attempts never
/// time out and permissions are always checked.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SessionOptions {
    #[serde(
        rename = "connect_timeout_ms",
        with = "millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout: Option<Duration>,
    /// Skip the permission gate, e.g. when running on a simulator.
    pub bypass_permissions: bool,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
