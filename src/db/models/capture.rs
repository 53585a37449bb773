use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureRecordStatus {
    Active,
    Ended,
    /// Found `Active` at startup: the app died mid-session.
    Interrupted,
}

impl CaptureRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureRecordStatus::Active => "Active",
            CaptureRecordStatus::Ended => "Ended",
            CaptureRecordStatus::Interrupted => "Interrupted",
        }
    }
}

impl FromStr for CaptureRecordStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [Self::Active, Self::Ended, Self::Interrupted]
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| anyhow!("unknown capture session status {value}"))
    }
}

/// One row of capture history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    pub operator_id: Option<String>,
    pub status: CaptureRecordStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub present_count: u64,
    pub unresolved_count: u64,
    pub average_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterRecord {
    pub session_id: String,
    pub subject_id: String,
    pub position: u64,
    pub display_name: String,
    pub confidence: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub hits: u32,
}
