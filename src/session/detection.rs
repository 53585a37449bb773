use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recognition result pushed by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Roll number or other stable id. `None` when the face was not matched.
    pub subject_id: Option<String>,
    pub display_name: String,
    /// Percent, already normalised into `0..=100`.
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
    /// Capture session whose frame produced this result, when echoed back.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl DetectionEvent {
    pub fn is_resolved(&self) -> bool {
        self.subject_id.is_some()
    }
}
