use serde::Serialize;

use crate::{capture::CaptureStatus, channel::ChannelState, utils::time::format_mm_ss};

use super::CaptureSession;

/// Figures shown on the live monitoring panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub present_count: usize,
    pub expected_count: usize,
    pub absent_count: usize,
    /// Present over expected, in percent. Zero when nobody is expected.
    pub attendance_percentage: f64,
    pub average_confidence: f64,
    pub unresolved_count: u64,
    pub elapsed_seconds: u64,
    pub clock: String,
    pub capture_status: CaptureStatus,
    pub channel_state: ChannelState,
}

impl SessionMetrics {
    pub fn derive(
        session: &CaptureSession,
        expected_count: usize,
        capture_status: CaptureStatus,
        channel_state: ChannelState,
    ) -> Self {
        let present_count = session.roster.len();
        let attendance_percentage = if expected_count == 0 {
            0.0
        } else {
            (present_count as f64 / expected_count as f64 * 100.0).min(100.0)
        };

        Self {
            present_count,
            expected_count,
            absent_count: expected_count.saturating_sub(present_count),
            attendance_percentage,
            average_confidence: session.roster.average_confidence(),
            unresolved_count: session.unresolved_count,
            elapsed_seconds: session.elapsed_seconds,
            clock: format_mm_ss(session.elapsed_seconds),
            capture_status,
            channel_state,
        }
    }
}
