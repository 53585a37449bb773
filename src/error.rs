use thiserror::Error;

/// Failure classes of the capture pipeline.
///
/// Only `CameraUnavailable` and `NotAuthenticated` ever reach a caller as an
/// `Err`. The others are recovered where they happen: the channel retries,
/// malformed messages are dropped one at a time, and stale transitions are
/// logged and reported as ignored outcomes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("cannot {action} while session is {from}")]
    StaleTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("an authenticated identity is required to start a capture session")]
    NotAuthenticated,
}

impl CaptureError {
    pub fn stale(from: &'static str, action: &'static str) -> Self {
        CaptureError::StaleTransition { from, action }
    }

    /// Whether the error must be shown to the operator. Everything else is
    /// transient and already handled by the component that raised it.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CaptureError::CameraUnavailable(_) | CaptureError::NotAuthenticated
        )
    }
}
