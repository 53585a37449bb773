use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{DropReason, PushChannel, SendOutcome},
    config::SamplerConfig,
    metrics::{FrameMetrics, MetricsCollector},
};

use super::{device::VideoSource, encoder::encode_frame};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Where sampled frames go. Implemented by [`PushChannel`]; tests substitute
/// a recorder.
pub trait FrameSink: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    /// A previous frame has been queued but not yet flushed.
    fn frame_pending(&self) -> bool;
    fn send_frame(&self, session_id: &str, data_url: String) -> SendOutcome;
}

impl FrameSink for PushChannel {
    fn is_open(&self) -> bool {
        PushChannel::is_open(self)
    }

    fn frame_pending(&self) -> bool {
        PushChannel::frame_pending(self)
    }

    fn send_frame(&self, session_id: &str, data_url: String) -> SendOutcome {
        PushChannel::send_frame(self, session_id, data_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    NotArmed,
    SourceNotReady,
    ChannelNotOpen,
    SendPending,
    SessionStopped,
    CaptureFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TickOutcome {
    Sent { bytes: usize },
    Skipped { reason: SkipReason },
}

impl TickOutcome {
    fn skipped(reason: SkipReason) -> Self {
        TickOutcome::Skipped { reason }
    }
}

pub(crate) type SharedSource = Arc<Mutex<Box<dyn VideoSource>>>;

/// One capture step: grab, scale, encode, hand to the channel.
///
/// Never queues. A tick that finds the channel closed, a frame still in
/// flight, or no session armed is skipped outright.
#[derive(Clone)]
pub struct FrameSampler {
    source: SharedSource,
    sink: Arc<dyn FrameSink>,
    config: SamplerConfig,
    armed: Arc<RwLock<Option<String>>>,
    metrics: MetricsCollector,
}

impl FrameSampler {
    pub fn new(
        source: Box<dyn VideoSource>,
        sink: Arc<dyn FrameSink>,
        config: SamplerConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            sink,
            config,
            armed: Arc::new(RwLock::new(None)),
            metrics,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub(crate) fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn armed_session(&self) -> Option<String> {
        self.armed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_armed(&self, session_id: Option<String>) {
        *self.armed.write().unwrap_or_else(PoisonError::into_inner) = session_id;
    }

    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.try_tick().await;
        if let TickOutcome::Skipped { reason } = outcome {
            self.metrics.record_skip(reason).await;
        }
        outcome
    }

    async fn try_tick(&self) -> TickOutcome {
        let started = Instant::now();
        let Some(session_id) = self.armed_session() else {
            return TickOutcome::skipped(SkipReason::NotArmed);
        };
        if !self.sink.is_open() {
            return TickOutcome::skipped(SkipReason::ChannelNotOpen);
        }
        if self.sink.frame_pending() {
            return TickOutcome::skipped(SkipReason::SendPending);
        }

        let frame = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            if !source.is_ready() {
                return TickOutcome::skipped(SkipReason::SourceNotReady);
            }
            match source.current_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log_warn!("frame grab failed for session {session_id}: {err:#}");
                    return TickOutcome::skipped(SkipReason::CaptureFailed);
                }
            }
        };
        let grab_ms = started.elapsed().as_millis() as u64;

        let encode_started = Instant::now();
        let config = self.config.clone();
        let encoded = match tokio::task::spawn_blocking(move || encode_frame(&frame, &config)).await
        {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(err)) => {
                log_warn!("frame encode failed for session {session_id}: {err:#}");
                return TickOutcome::skipped(SkipReason::CaptureFailed);
            }
            Err(err) => {
                log_warn!("frame encode worker failed: {err}");
                return TickOutcome::skipped(SkipReason::CaptureFailed);
            }
        };
        let encode_ms = encode_started.elapsed().as_millis() as u64;

        let bytes = encoded.len();
        let sent = {
            // Held across the send so a concurrent disarm waits for it.
            let armed = self.armed.read().unwrap_or_else(PoisonError::into_inner);
            if armed.as_deref() != Some(session_id.as_str()) {
                return TickOutcome::skipped(SkipReason::SessionStopped);
            }
            self.sink.send_frame(&session_id, encoded.to_data_url())
        };

        match sent {
            SendOutcome::Queued => {
                self.metrics
                    .record_frame(FrameMetrics {
                        timestamp: Utc::now(),
                        grab_ms,
                        encode_ms,
                        payload_bytes: bytes,
                        total_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
                TickOutcome::Sent { bytes }
            }
            SendOutcome::Dropped(DropReason::FramePending) => {
                TickOutcome::skipped(SkipReason::SendPending)
            }
            SendOutcome::Dropped(reason) => {
                log_debug!("frame dropped by channel: {reason:?}");
                TickOutcome::skipped(SkipReason::ChannelNotOpen)
            }
        }
    }
}

/// Drives [`FrameSampler::tick`] on the configured interval until cancelled.
/// Missed ticks are skipped rather than bunched up.
pub async fn sampling_loop(sampler: FrameSampler, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(sampler.config().interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    outcome = sampler.tick() => {
                        if let TickOutcome::Skipped { reason } = outcome {
                            log_debug!("sampler tick skipped: {reason:?}");
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
    log_info!("sampling loop shutting down");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::{DeviceRegistry, FrameSlot, FrameSlotSource};
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records frames instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) open: AtomicBool,
        pub(crate) pending: AtomicBool,
        pub(crate) sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub(crate) fn opened() -> Arc<Self> {
            let sink = Arc::new(Self::default());
            sink.open.store(true, Ordering::SeqCst);
            sink
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl FrameSink for RecordingSink {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn frame_pending(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }

        fn send_frame(&self, session_id: &str, data_url: String) -> SendOutcome {
            if !self.is_open() {
                return SendOutcome::Dropped(DropReason::NotOpen);
            }
            self.sent
                .lock()
                .unwrap()
                .push((session_id.to_string(), data_url));
            SendOutcome::Queued
        }
    }

    pub(crate) fn live_source() -> (Box<dyn VideoSource>, FrameSlot) {
        let slot = FrameSlot::new();
        slot.submit(DynamicImage::ImageRgb8(RgbImage::new(32, 24)));
        let source = FrameSlotSource::new("test-cam", slot.clone(), DeviceRegistry::new());
        (Box::new(source), slot)
    }

    fn small_config() -> SamplerConfig {
        SamplerConfig {
            target_width: 16,
            target_height: 12,
            ..SamplerConfig::default()
        }
    }

    fn armed_sampler(sink: Arc<dyn FrameSink>) -> FrameSampler {
        let (source, _slot) = live_source();
        let sampler = FrameSampler::new(source, sink, small_config(), MetricsCollector::new());
        sampler.source().lock().unwrap().open().unwrap();
        sampler.set_armed(Some("session-1".into()));
        sampler
    }

    #[tokio::test]
    async fn closed_channel_means_zero_transmissions() {
        let sink = Arc::new(RecordingSink::default());
        let sampler = armed_sampler(sink.clone());

        for _ in 0..5 {
            assert_eq!(
                sampler.tick().await,
                TickOutcome::Skipped {
                    reason: SkipReason::ChannelNotOpen
                }
            );
        }
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn closed_push_channel_is_never_written() {
        use crate::channel::fake::FakeConnector;
        use crate::config::ReconnectPolicy;

        let (connector, _accepted) = FakeConnector::new();
        let channel = PushChannel::new(Arc::new(connector.clone()), ReconnectPolicy::default());
        let sampler = armed_sampler(Arc::new(channel.clone()));

        for _ in 0..5 {
            sampler.tick().await;
        }
        assert_eq!(connector.attempts(), 0);
        let snapshot = sampler.metrics.get_snapshot().await;
        assert_eq!(snapshot.frames_sent, 0);
        assert_eq!(snapshot.skipped.channel_not_open, 5);
    }

    #[tokio::test]
    async fn open_channel_receives_a_tagged_frame() {
        let sink = RecordingSink::opened();
        let sampler = armed_sampler(sink.clone());

        let outcome = sampler.tick().await;
        assert!(matches!(outcome, TickOutcome::Sent { bytes } if bytes > 0));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "session-1");
        assert!(sent[0].1.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn pending_send_skips_instead_of_queueing() {
        let sink = RecordingSink::opened();
        sink.pending.store(true, Ordering::SeqCst);
        let sampler = armed_sampler(sink.clone());

        for _ in 0..3 {
            assert_eq!(
                sampler.tick().await,
                TickOutcome::Skipped {
                    reason: SkipReason::SendPending
                }
            );
        }
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn unarmed_or_unready_sampler_does_nothing() {
        let sink = RecordingSink::opened();
        let sampler = armed_sampler(sink.clone());

        sampler.set_armed(None);
        assert_eq!(
            sampler.tick().await,
            TickOutcome::Skipped {
                reason: SkipReason::NotArmed
            }
        );

        sampler.set_armed(Some("session-1".into()));
        sampler.source().lock().unwrap().close();
        assert_eq!(
            sampler.tick().await,
            TickOutcome::Skipped {
                reason: SkipReason::SourceNotReady
            }
        );
        assert_eq!(sink.sent_count(), 0);
    }
}
