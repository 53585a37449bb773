use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;

use crate::error::CaptureError;

use super::device::{DeviceLease, DeviceRegistry, VideoSource};

#[derive(Default)]
struct SlotState {
    latest: Option<DynamicImage>,
    denied: Option<String>,
}

/// Latest-frame mailbox filled by whoever owns the physical camera (the
/// webview in the desktop shell). Only the newest frame is kept.
#[derive(Clone, Default)]
pub struct FrameSlot {
    state: Arc<Mutex<SlotState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, frame: DynamicImage) {
        let mut state = self.state();
        state.denied = None;
        state.latest = Some(frame);
    }

    /// Decodes an encoded still (JPEG, PNG, ...) and stores it.
    pub fn submit_encoded(&self, bytes: &[u8]) -> Result<()> {
        let frame = image::load_from_memory(bytes).context("failed to decode camera frame")?;
        self.submit(frame);
        Ok(())
    }

    /// Records that the camera could not be acquired (permission denied,
    /// device busy). The next `open` fails with that reason.
    pub fn report_unavailable(&self, reason: impl Into<String>) {
        let mut state = self.state();
        state.latest = None;
        state.denied = Some(reason.into());
    }

    pub fn has_frame(&self) -> bool {
        self.state().latest.is_some()
    }

    fn latest(&self) -> Option<DynamicImage> {
        self.state().latest.clone()
    }

    fn denied(&self) -> Option<String> {
        self.state().denied.clone()
    }

    fn clear(&self) {
        self.state().latest = None;
    }
}

pub struct FrameSlotSource {
    device_id: String,
    slot: FrameSlot,
    registry: DeviceRegistry,
    lease: Option<DeviceLease>,
}

impl FrameSlotSource {
    pub fn new(device_id: impl Into<String>, slot: FrameSlot, registry: DeviceRegistry) -> Self {
        Self {
            device_id: device_id.into(),
            slot,
            registry,
            lease: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }
}

impl VideoSource for FrameSlotSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.lease.is_some() {
            return Ok(());
        }
        if let Some(reason) = self.slot.denied() {
            return Err(CaptureError::CameraUnavailable(reason));
        }
        self.lease = Some(self.registry.claim(&self.device_id)?);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lease.is_some() && self.slot.has_frame()
    }

    fn current_frame(&mut self) -> Result<DynamicImage> {
        if self.lease.is_none() {
            return Err(anyhow!("camera {} is not open", self.device_id));
        }
        self.slot
            .latest()
            .ok_or_else(|| anyhow!("camera {} has not produced a frame yet", self.device_id))
    }

    fn close(&mut self) {
        if self.lease.take().is_some() {
            // A frame from before the release must not be sampled later.
            self.slot.clear();
        }
    }
}

impl Drop for FrameSlotSource {
    fn drop(&mut self) {
        self.close();
    }
}
