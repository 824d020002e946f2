use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_timeout_secs() -> u64 {
    30
}

/// Endpoints and call policy for the external capability services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Speech-recognition service base URL.
    pub recognition_url: String,
    /// Reply-generation service base URL.
    pub generation_url: String,
    /// Speech-synthesis service base URL.
    pub synthesis_url: String,
    /// Emotion-classification service base URL.
    pub classification_url: String,
    /// Per-call deadline in seconds. A capability that never answers
    /// surfaces as a timeout error instead of a stalled worker.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            recognition_url: "http://127.0.0.1:8101".to_string(),
            generation_url: "http://127.0.0.1:8102".to_string(),
            synthesis_url: "http://127.0.0.1:8103".to_string(),
            classification_url: "http://127.0.0.1:8104".to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CapabilityConfig {
    /// The per-call deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
