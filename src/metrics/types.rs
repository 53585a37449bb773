use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timing of one transmitted frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetrics {
    pub timestamp: DateTime<Utc>,
    pub grab_ms: u64,
    pub encode_ms: u64,
    pub payload_bytes: usize,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkipCounts {
    pub not_armed: u64,
    pub source_not_ready: u64,
    pub channel_not_open: u64,
    pub send_pending: u64,
    pub session_stopped: u64,
    pub capture_failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_frames: Vec<FrameMetrics>,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub skipped: SkipCounts,
}
