#[cfg(feature = "desktop")]
pub mod commands;
pub mod controller;
pub mod detection;
pub mod metrics;
pub mod roster;
pub mod state;

pub use controller::{DetectionSession, SessionOutcome, SessionSnapshot};
pub use detection::DetectionEvent;
pub use metrics::SessionMetrics;
pub use roster::{Roster, RosterChange, RosterEntry};
pub use state::{CaptureSession, DetectionOutcome, SessionStatus};
