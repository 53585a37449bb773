use std::sync::PoisonError;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::CaptureError;

use super::sampler::{sampling_loop, FrameSampler};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CaptureStatus {
    Idle,
    #[serde(rename_all = "camelCase")]
    Sampling { session_id: String },
    CameraUnavailable { reason: String },
}

/// Owns the sampling task and the camera for the lifetime of one session.
pub struct SamplerController {
    sampler: FrameSampler,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    status_tx: watch::Sender<CaptureStatus>,
}

impl SamplerController {
    pub fn new(sampler: FrameSampler) -> Self {
        let (status_tx, _) = watch::channel(CaptureStatus::Idle);
        Self {
            sampler,
            handle: None,
            cancel_token: None,
            status_tx,
        }
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    pub fn status(&self) -> CaptureStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CaptureStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Acquires the camera and starts sampling for `session_id`. Fails fast
    /// without spawning anything when the camera cannot be opened.
    pub fn arm(&mut self, session_id: String) -> Result<(), CaptureError> {
        self.halt();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        {
            let mut source = self
                .sampler
                .source()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = source.open() {
                log_warn!("camera {} unavailable: {err}", source.device_id());
                let reason = match &err {
                    CaptureError::CameraUnavailable(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.status_tx
                    .send_replace(CaptureStatus::CameraUnavailable { reason });
                return Err(err);
            }
        }

        self.sampler.set_armed(Some(session_id.clone()));

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(self.sampler.clone(), cancel_token.clone()));
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);

        log_info!("sampling armed for session {session_id}");
        self.status_tx
            .send_replace(CaptureStatus::Sampling { session_id });
        Ok(())
    }

    /// Stops new ticks immediately. The task is joined by [`disarm`](Self::disarm).
    pub fn halt(&mut self) {
        self.sampler.set_armed(None);
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }

    /// Stops sampling, waits for the loop to exit and releases the camera.
    pub async fn disarm(&mut self) -> Result<()> {
        self.halt();
        let joined = match self.handle.take() {
            Some(handle) => handle.await.context("sampling loop task failed to join"),
            None => Ok(()),
        };
        self.release_camera();
        self.status_tx.send_replace(CaptureStatus::Idle);
        joined
    }

    fn release_camera(&self) {
        self.sampler
            .source()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}

impl Drop for SamplerController {
    fn drop(&mut self) {
        self.halt();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.release_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sampler::tests::{live_source, RecordingSink};
    use crate::capture::{DeviceRegistry, FrameSlot, FrameSlotSource};
    use crate::config::SamplerConfig;
    use crate::metrics::MetricsCollector;
    use std::{sync::Arc, time::Duration};

    fn fast_config() -> SamplerConfig {
        SamplerConfig {
            interval_ms: 10,
            target_width: 16,
            target_height: 12,
            quality: 50,
        }
    }

    #[tokio::test]
    async fn denied_camera_fails_arm_and_reports_status() {
        let slot = FrameSlot::new();
        slot.report_unavailable("permission denied");
        let source = FrameSlotSource::new("cam", slot, DeviceRegistry::new());
        let sink = RecordingSink::opened();
        let sampler = FrameSampler::new(
            Box::new(source),
            sink.clone(),
            fast_config(),
            MetricsCollector::new(),
        );
        let mut controller = SamplerController::new(sampler);

        let result = controller.arm("s-1".into());
        assert_eq!(
            result,
            Err(CaptureError::CameraUnavailable("permission denied".into()))
        );
        assert!(!controller.is_running());
        assert_eq!(controller.sampler().armed_session(), None);
        assert_eq!(
            controller.status(),
            CaptureStatus::CameraUnavailable {
                reason: "permission denied".into()
            }
        );
    }

    #[tokio::test]
    async fn disarm_stops_sends_and_releases_the_camera() {
        let (source, _slot) = live_source();
        let sink = RecordingSink::opened();
        let sampler =
            FrameSampler::new(source, sink.clone(), fast_config(), MetricsCollector::new());
        let mut controller = SamplerController::new(sampler);

        controller.arm("s-1".into()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.sent_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        controller.disarm().await.unwrap();
        assert_eq!(controller.status(), CaptureStatus::Idle);
        let after_stop = sink.sent_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.sent_count(), after_stop);
        assert!(!controller.sampler().source().lock().unwrap().is_ready());
    }

    #[tokio::test]
    async fn dropping_the_controller_frees_the_device() {
        let registry = DeviceRegistry::new();
        let slot = FrameSlot::new();
        let source = FrameSlotSource::new("cam", slot, registry.clone());
        let sink: Arc<RecordingSink> = RecordingSink::opened();
        let sampler = FrameSampler::new(
            Box::new(source),
            sink,
            fast_config(),
            MetricsCollector::new(),
        );
        let mut controller = SamplerController::new(sampler);
        controller.arm("s-1".into()).unwrap();
        assert!(registry.is_held("cam"));

        drop(controller);
        assert!(!registry.is_held("cam"));
    }
}
