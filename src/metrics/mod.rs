mod types;

pub use types::{FrameMetrics, MetricsSnapshot, SkipCounts, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::capture::SkipReason;

const MAX_RECENT_FRAMES: usize = 20;

/// Rolling sampler telemetry shared between the capture loop and the UI.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_frames: Vec<FrameMetrics>,
    frames_sent: u64,
    bytes_sent: u64,
    skipped: SkipCounts,
    system: System,
    pid: Pid,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta, so take a baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_frames: Vec::with_capacity(MAX_RECENT_FRAMES),
                frames_sent: 0,
                bytes_sent: 0,
                skipped: SkipCounts::default(),
                system,
                pid,
            })),
        }
    }

    pub async fn record_frame(&self, metrics: FrameMetrics) {
        let mut state = self.inner.lock().await;
        state.frames_sent += 1;
        state.bytes_sent += metrics.payload_bytes as u64;
        state.recent_frames.push(metrics);
        if state.recent_frames.len() > MAX_RECENT_FRAMES {
            state.recent_frames.remove(0);
        }
    }

    pub async fn record_skip(&self, reason: SkipReason) {
        let mut state = self.inner.lock().await;
        let counter = match reason {
            SkipReason::NotArmed => &mut state.skipped.not_armed,
            SkipReason::SourceNotReady => &mut state.skipped.source_not_ready,
            SkipReason::ChannelNotOpen => &mut state.skipped.channel_not_open,
            SkipReason::SendPending => &mut state.skipped.send_pending,
            SkipReason::SessionStopped => &mut state.skipped.session_stopped,
            SkipReason::CaptureFailed => &mut state.skipped.capture_failed,
        };
        *counter += 1;
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = state
            .system
            .process(pid)
            .map(|process| SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            })
            .unwrap_or_default();

        MetricsSnapshot {
            system,
            recent_frames: state.recent_frames.clone(),
            frames_sent: state.frames_sent,
            bytes_sent: state.bytes_sent,
            skipped: state.skipped.clone(),
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_frames.clear();
        state.frames_sent = 0;
        state.bytes_sent = 0;
        state.skipped = SkipCounts::default();
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}
