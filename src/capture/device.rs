use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::Result;
use image::DynamicImage;

use crate::error::CaptureError;

/// A camera-like frame producer.
///
/// `open` acquires the device and must fail fast with
/// [`CaptureError::CameraUnavailable`] when it is denied or already held.
/// `close` releases it and is safe to call repeatedly.
pub trait VideoSource: Send + 'static {
    fn device_id(&self) -> &str;
    fn open(&mut self) -> Result<(), CaptureError>;
    fn is_ready(&self) -> bool;
    fn current_frame(&mut self) -> Result<DynamicImage>;
    fn close(&mut self);
}

/// Tracks which devices are exclusively held in this process.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    held: Arc<Mutex<HashMap<String, u64>>>,
    next_token: Arc<AtomicU64>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, device_id: &str) -> Result<DeviceLease, CaptureError> {
        let mut held = self.held();
        if held.contains_key(device_id) {
            return Err(CaptureError::CameraUnavailable(format!(
                "{device_id} is in use by another capture"
            )));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(device_id.to_string(), token);
        Ok(DeviceLease {
            registry: self.clone(),
            device_id: device_id.to_string(),
            token,
        })
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        self.held().contains_key(device_id)
    }
}

/// Exclusive hold on one device, released on drop.
pub struct DeviceLease {
    registry: DeviceRegistry,
    device_id: String,
    token: u64,
}

impl DeviceLease {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut held = self.registry.held();
        if held.get(&self.device_id) == Some(&self.token) {
            held.remove(&self.device_id);
            log::debug!("released camera {}", self.device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_fast_until_release() {
        let registry = DeviceRegistry::new();
        let lease = registry.claim("front").unwrap();
        assert_eq!(lease.device_id(), "front");

        let busy = registry.claim("front");
        assert!(matches!(busy, Err(CaptureError::CameraUnavailable(_))));
        assert!(registry.claim("rear").is_ok());

        drop(lease);
        assert!(!registry.is_held("front"));
        assert!(registry.claim("front").is_ok());
    }
}
